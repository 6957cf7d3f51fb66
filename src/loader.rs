use calamine::{Data, Reader, Xlsx};
use std::error::Error;
use std::io::Cursor;

/// A worksheet read into trimmed strings.
///
/// `headers` is the first non-empty row. `rows[i]` is spreadsheet line
/// `header_offset + i + 2`, where `header_offset` counts the rows above the
/// header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SheetRows {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub header_offset: usize,
}

impl SheetRows {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        SheetRows {
            headers,
            rows,
            header_offset: 0,
        }
    }

    /// Index of the column whose header matches `name`, ignoring case and
    /// spaces
    pub fn column(&self, name: &str) -> Option<usize> {
        let wanted = normalise_header(name);
        self.headers
            .iter()
            .position(|h| normalise_header(h) == wanted)
    }

    /// 1-based spreadsheet line of `rows[index]`
    pub fn line_number(&self, index: usize) -> usize {
        self.header_offset + index + 2
    }

    /// Split `lines` at the first row with any content, which becomes the
    /// header. `rows_above` is how many sheet rows precede `lines[0]`.
    fn split_header(lines: Vec<Vec<String>>, rows_above: usize) -> Option<Self> {
        let first = lines
            .iter()
            .position(|row| row.iter().any(|cell| !cell.is_empty()))?;
        let mut rest = lines.into_iter().skip(first);
        let headers = rest.next()?;
        Some(SheetRows {
            headers,
            rows: rest.collect(),
            header_offset: rows_above + first,
        })
    }
}

fn normalise_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Load an uploaded workbook from memory
///
/// Picks the reader by file name: `.csv` is parsed as text, `.xlsx`,
/// `.xlsm` or a name without extension as an Excel workbook.
///
/// # Arguments
/// * `filename` - Name the file was uploaded under
/// * `data` - Raw bytes of the upload
///
/// # Returns
/// * `Result<SheetRows, Box<dyn Error + Send + Sync>>` - Header and rows of
///   the first worksheet, or an error for unreadable or unsupported files
///
/// # Examples
/// ```no_run
/// use cabtrack::loader::load_upload;
///
/// let data = std::fs::read("cabsched.xlsx").unwrap();
/// match load_upload("cabsched.xlsx", &data) {
///     Ok(sheet) => println!("{} data rows", sheet.rows.len()),
///     Err(e) => eprintln!("Error reading upload: {}", e),
/// }
/// ```
pub fn load_upload(filename: &str, data: &[u8]) -> Result<SheetRows, Box<dyn Error + Send + Sync>> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => from_csv(std::str::from_utf8(data)?),
        Some("xlsx") | Some("xlsm") | None => from_xlsx(data),
        Some(ext) => Err(format!("Unsupported file extension: {}", ext).into()),
    }
}

/// Read the first worksheet of an `.xlsx` workbook
///
/// Line numbers stay those of the worksheet even when the used range does
/// not start at the first row.
///
/// # Arguments
/// * `data` - Workbook bytes
///
/// # Returns
/// * `Result<SheetRows, Box<dyn Error + Send + Sync>>` - Header and rows, or
///   an error when the workbook has no sheet or the sheet is empty
pub fn from_xlsx(data: &[u8]) -> Result<SheetRows, Box<dyn Error + Send + Sync>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(data))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .ok_or("No sheets found in Excel file")?
        .clone();

    let range = workbook.worksheet_range(&sheet_name)?;
    let rows_above = range.start().map_or(0, |(row, _)| row as usize);

    let lines: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Ok(SheetRows::split_header(lines, rows_above).ok_or("Excel sheet is empty")?)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// Read CSV text, first non-empty line as headers
///
/// # Arguments
/// * `text` - The whole CSV file
///
/// # Returns
/// * `Result<SheetRows, Box<dyn Error + Send + Sync>>` - Header and rows, or
///   an error when the text holds no non-empty line
///
/// # Examples
/// ```
/// use cabtrack::loader::from_csv;
///
/// let sheet = from_csv("CabNum,Length\nC1,25\n").unwrap();
/// assert_eq!(sheet.column("length"), Some(1));
/// assert_eq!(sheet.line_number(0), 2);
/// ```
pub fn from_csv(text: &str) -> Result<SheetRows, Box<dyn Error + Send + Sync>> {
    let lines: Vec<Vec<String>> = text.lines().map(parse_csv_row).collect();
    Ok(SheetRows::split_header(lines, 0).ok_or("CSV file is empty")?)
}

// Parse a CSV row into a vector of trimmed strings
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Doubled quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(current_field.trim().to_string());
                current_field = String::new();
            }
            '\r' if !in_quotes => {}
            _ => current_field.push(c),
        }
    }

    result.push(current_field.trim().to_string());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_and_trimming() {
        let sheet = from_csv("Ref, Description\r\n P-1 ,\"Pump, \"\"main\"\"\"\n").unwrap();
        assert_eq!(sheet.headers, vec!["Ref", "Description"]);
        assert_eq!(sheet.rows[0], vec!["P-1", "Pump, \"main\""]);
    }

    #[test]
    fn headers_match_loosely() {
        let sheet = SheetRows::new(vec!["Equip Ref".into(), "LAB_NORM".into()], vec![]);
        assert_eq!(sheet.column("EquipRef"), Some(0));
        assert_eq!(sheet.column("labnorm"), Some(1));
        assert_eq!(sheet.column("Length"), None);
    }

    #[test]
    fn xlsx_upload_is_read_from_memory() {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "CabNum").unwrap();
        worksheet.write_string(0, 1, "Length").unwrap();
        worksheet.write_string(1, 0, "C1").unwrap();
        worksheet.write_number(1, 1, 25.0).unwrap();
        worksheet.write_number(2, 1, 12.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let sheet = load_upload("cables.xlsx", &bytes).unwrap();
        assert_eq!(sheet.headers, vec!["CabNum", "Length"]);
        assert_eq!(sheet.rows[0], vec!["C1", "25"]);
        assert_eq!(sheet.rows[1], vec!["", "12.5"]);
    }

    #[test]
    fn rows_above_the_header_keep_sheet_line_numbers() {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(1, 0, "CabNum").unwrap();
        worksheet.write_string(2, 0, "C1").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let sheet = from_xlsx(&bytes).unwrap();
        assert_eq!(sheet.headers, vec!["CabNum"]);
        assert_eq!(sheet.rows, vec![vec!["C1".to_string()]]);
        assert_eq!(sheet.line_number(0), 3);
    }

    #[test]
    fn blank_csv_lines_before_the_header_are_skipped() {
        let sheet = from_csv("\n,\nRef,Description\nP-1,Pump\n").unwrap();
        assert_eq!(sheet.headers, vec!["Ref", "Description"]);
        assert_eq!(sheet.line_number(0), 4);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(load_upload("cables.ods", b"").is_err());
    }
}
