use tracing::warn;

/// Class groups in the order they are updated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootOrder {
  groups: Vec<Vec<String>>,
}

impl BootOrder {
  pub fn new(groups: Vec<Vec<String>>) -> Self {
    Self { groups }
  }

  /// Parse `["sh,idx", "fwd"]`-style arguments: whitespace separates groups, commas separate classes.
  pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
    let groups = args
      .iter()
      .flat_map(|arg| arg.as_ref().split_whitespace().map(str::to_string).collect::<Vec<_>>())
      .map(|group| {
        group
          .split(',')
          .map(str::trim)
          .filter(|c| !c.is_empty())
          .map(str::to_string)
          .collect::<Vec<_>>()
      })
      .filter(|group| !group.is_empty())
      .collect();
    Self { groups }
  }

  pub fn groups(&self) -> &[Vec<String>] {
    &self.groups
  }

  /// The configured groups followed by one catch-all group of every class not placed.
  ///
  /// The catch-all is always present, possibly empty. Unknown classes are
  /// kept in their group but warned about.
  pub fn expand(&self, known_classes: &[String]) -> Vec<Vec<String>> {
    let mut remaining: Vec<String> = known_classes.to_vec();
    let mut expanded = Vec::with_capacity(self.groups.len() + 1);

    for group in &self.groups {
      for class in group {
        match remaining.iter().position(|c| c == class) {
          Some(pos) => {
            remaining.remove(pos);
          }
          None => warn!(class = %class, "boot order class does not match any host class"),
        }
      }
      expanded.push(group.clone());
    }

    expanded.push(remaining);
    expanded
  }
}
