use std::{
    borrow::Cow,
    collections::HashMap,
    fs::{self, File},
    io,
    path::Path,
};

use indexmap::IndexMap;

use crate::error::TableError;

/// A single column; missing cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Free text (CSV input, dimension categories, districts).
    Text(Vec<Option<String>>),
    /// Floating point measurements.
    Number(Vec<Option<f64>>),
}

impl Column {
    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(cells) => cells.len(),
            Self::Number(cells) => cells.len(),
        }
    }

    /// Whether the column has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the cell at `row` is missing.
    #[must_use]
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Self::Text(cells) => cells.get(row).map_or(true, Option::is_none),
            Self::Number(cells) => cells.get(row).map_or(true, Option::is_none),
        }
    }

    /// Cell rendered as text; numbers use their shortest decimal form.
    #[must_use]
    pub fn text(&self, row: usize) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(cells) => cells.get(row)?.as_deref().map(Cow::Borrowed),
            Self::Number(cells) => cells.get(row)?.map(|v| Cow::Owned(v.to_string())),
        }
    }

    /// Cell as a number; text is parsed and unparseable text reads as missing.
    #[must_use]
    pub fn number(&self, row: usize) -> Option<f64> {
        match self {
            Self::Text(cells) => cells.get(row)?.as_deref().and_then(parse_number),
            Self::Number(cells) => *cells.get(row)?,
        }
    }

    /// Numeric view of every cell.
    #[must_use]
    pub fn to_numbers(&self) -> Vec<Option<f64>> {
        match self {
            Self::Text(cells) => cells
                .iter()
                .map(|cell| cell.as_deref().and_then(parse_number))
                .collect(),
            Self::Number(cells) => cells.clone(),
        }
    }

    /// Count of missing cells.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        match self {
            Self::Text(cells) => cells.iter().filter(|c| c.is_none()).count(),
            Self::Number(cells) => cells.iter().filter(|c| c.is_none()).count(),
        }
    }

    /// New column holding the cells at `indices`, in that order.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Text(cells) => Self::Text(indices.iter().map(|&i| cells[i].clone()).collect()),
            Self::Number(cells) => Self::Number(indices.iter().map(|&i| cells[i]).collect()),
        }
    }

    fn retain(&mut self, keep: &[bool]) {
        match self {
            Self::Text(cells) => retain_mask(cells, keep),
            Self::Number(cells) => retain_mask(cells, keep),
        }
    }
}

fn retain_mask<T>(cells: &mut Vec<T>, keep: &[bool]) {
    let mut idx = 0;
    cells.retain(|_| {
        let kept = keep.get(idx).copied().unwrap_or(false);
        idx += 1;
        kept
    });
}

/// Parses a trimmed decimal number. Blank text is missing.
#[must_use]
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Column-oriented table with ordered, uniquely named columns of equal height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Column>,
    height: usize,
}

impl Table {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from named columns, rejecting ragged input.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, column) in columns {
            table.insert(name, column)?;
        }
        Ok(table)
    }

    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.keys().map(String::as_str)
    }

    /// Named columns in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> + '_ {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    /// Looks up a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Looks up a column, failing with [`TableError::UnknownColumn`].
    pub fn require(&self, name: &str) -> Result<&Column, TableError> {
        self.column(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    /// Whether a column exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Inserts or replaces a column (replacement keeps the original position).
    /// The first column of an empty table defines its height.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<(), TableError> {
        let name = name.into();
        if self.columns.is_empty() {
            self.height = column.len();
        } else if column.len() != self.height {
            return Err(TableError::Length {
                column: name,
                actual: column.len(),
                expected: self.height,
            });
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Removes a column, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        self.columns.shift_remove(name)
    }

    /// Renames columns found in `mapping` (old name -> new name). When two
    /// columns land on the same name the later one wins.
    pub fn rename(&mut self, mapping: &HashMap<String, String>) {
        let columns = std::mem::take(&mut self.columns);
        for (name, column) in columns {
            let target = mapping.get(&name).cloned().unwrap_or(name);
            self.columns.insert(target, column);
        }
    }

    /// New table with only `names`, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, TableError> {
        let mut selected = Self::new();
        for name in names {
            let name = name.as_ref();
            selected.insert(name, self.require(name)?.clone())?;
        }
        if selected.columns.is_empty() {
            selected.height = self.height;
        }
        Ok(selected)
    }

    /// Converts a column to numbers in place. Returns `false` when absent.
    pub fn coerce_numeric(&mut self, name: &str) -> bool {
        match self.columns.get_mut(name) {
            Some(column) => {
                if let Column::Text(_) = column {
                    *column = Column::Number(column.to_numbers());
                }
                true
            }
            None => false,
        }
    }

    /// Applies `f` to every present cell of a numeric column; results that
    /// come back `None` become missing.
    pub fn map_numbers(&mut self, name: &str, f: impl Fn(f64) -> Option<f64>) -> bool {
        if !self.coerce_numeric(name) {
            return false;
        }
        if let Some(Column::Number(cells)) = self.columns.get_mut(name) {
            for cell in cells.iter_mut() {
                *cell = cell.and_then(&f);
            }
        }
        true
    }

    /// Keeps the rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in self.columns.values_mut() {
            column.retain(keep);
        }
        self.height = keep
            .iter()
            .take(self.height)
            .filter(|&&kept| kept)
            .count();
    }

    /// New table with the rows at `indices`, in that order.
    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.take(indices)))
                .collect(),
            height: indices.len(),
        }
    }

    /// Reads a headed CSV stream; every column is text and empty fields are
    /// missing.
    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (idx, column) in cells.iter_mut().enumerate() {
                let field = record.get(idx).unwrap_or_default();
                column.push((!field.is_empty()).then(|| field.to_string()));
            }
        }
        Self::from_columns(
            headers
                .into_iter()
                .zip(cells)
                .map(|(name, column)| (name, Column::Text(column))),
        )
    }

    /// Reads a CSV file.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_csv_reader(io::BufReader::new(file))
    }

    /// Writes the table as headed CSV; missing cells are empty fields.
    pub fn to_csv_writer<W: io::Write>(&self, writer: W) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.columns.keys())?;
        for row in 0..self.height {
            writer.write_record(
                self.columns
                    .values()
                    .map(|column| column.text(row).map(Cow::into_owned).unwrap_or_default()),
            )?;
        }
        writer.flush().map_err(|source| TableError::Io {
            path: "<csv writer>".into(),
            source,
        })?;
        Ok(())
    }

    /// Writes a CSV file, creating parent directories.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        let io_err = |source| TableError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let file = File::create(path).map_err(io_err)?;
        self.to_csv_writer(io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns([
            (
                "district",
                Column::Text(vec![Some("Södermalm".into()), None, Some("Bromma".into())]),
            ),
            ("area", Column::Number(vec![Some(65.0), Some(40.5), None])),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let mut table = sample();
        let err = table
            .insert("rooms", Column::Number(vec![Some(2.0)]))
            .unwrap_err();
        assert!(matches!(err, TableError::Length { expected: 3, .. }));
    }

    #[test]
    fn csv_round_trip_keeps_missing_cells() {
        let table = sample();
        let mut buf = Vec::new();
        table.to_csv_writer(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().next(), Some("district,area"));
        assert!(text.lines().any(|line| line == "Södermalm,65"));

        let back = Table::from_csv_reader(buf.as_slice()).unwrap();
        assert_eq!(back.height(), 3);
        let area = back.column("area").unwrap();
        assert_eq!(area.number(1), Some(40.5));
        assert!(area.is_missing(2));
        assert!(back.column("district").unwrap().is_missing(1));
    }

    #[test]
    fn rename_select_and_filter() {
        let mut table = sample();
        let mapping = HashMap::from([("area".to_string(), "living_area".to_string())]);
        table.rename(&mapping);
        assert_eq!(table.column_names().collect::<Vec<_>>(), ["district", "living_area"]);

        table.retain_rows(&[true, false, true]);
        assert_eq!(table.height(), 2);
        let selected = table.select(&["living_area"]).unwrap();
        assert_eq!(selected.width(), 1);
        assert_eq!(selected.column("living_area").unwrap().number(0), Some(65.0));
        assert!(table.select(&["missing"]).is_err());
    }

    #[test]
    fn coercion_turns_garbage_into_missing() {
        let mut table = Table::from_columns([(
            "fee",
            Column::Text(vec![Some(" 3200 ".into()), Some("n/a".into()), None]),
        )])
        .unwrap();
        assert!(table.coerce_numeric("fee"));
        assert_eq!(
            table.column("fee").unwrap(),
            &Column::Number(vec![Some(3200.0), None, None])
        );
        assert!(!table.coerce_numeric("absent"));
    }
}
