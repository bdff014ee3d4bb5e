/// Split CSV text into rows of fields.
///
/// Fields may be wrapped in double quotes; inside quotes commas and line
/// breaks are literal and `""` is an escaped quote. Blank lines are dropped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
  let mut rows = Vec::new();
  let mut row: Vec<String> = Vec::new();
  let mut field = String::new();
  let mut in_quotes = false;
  let mut chars = text.chars().peekable();

  while let Some(c) = chars.next() {
    if in_quotes {
      match c {
        '"' if chars.peek() == Some(&'"') => {
          chars.next();
          field.push('"');
        }
        '"' => in_quotes = false,
        _ => field.push(c),
      }
      continue;
    }

    match c {
      '"' => in_quotes = true,
      ',' => row.push(std::mem::take(&mut field)),
      '\r' => {}
      '\n' => finish_row(&mut rows, &mut row, &mut field),
      _ => field.push(c),
    }
  }
  finish_row(&mut rows, &mut row, &mut field);

  rows
}

fn finish_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String) {
  row.push(std::mem::take(field));
  let row = std::mem::take(row);
  if !(row.len() == 1 && row[0].trim().is_empty()) {
    rows.push(row);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quoted_fields_keep_commas_and_quotes() {
    let rows = parse_rows("a,\"b,c\",\"say \"\"hi\"\"\"\r\n\n1,2,3");
    assert_eq!(rows, vec![vec!["a", "b,c", "say \"hi\""], vec!["1", "2", "3"]]);
  }

  #[test]
  fn trailing_empty_fields_survive() {
    assert_eq!(parse_rows("a,,\n"), vec![vec!["a", "", ""]]);
  }
}
