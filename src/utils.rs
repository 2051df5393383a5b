use std::fmt::Display;

// Field encoders for `COPY ... FROM STDIN WITH DELIMITER ',' CSV`. In CSV mode an
// unquoted empty field is NULL and a quoted empty field is the empty string, so
// text is always quoted and only `None` is left bare.

pub fn csv_text(value: Option<&str>) -> String {
    match value {
        Some(text) => format!("\"{}\"", text.replace('"', "\"\"")),
        None => String::new(),
    }
}

pub fn csv_value<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn csv_line(fields: &[String]) -> String {
    let mut line = fields.join(",");
    line.push('\n');
    line
}
