use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};

/// Tabular query result: ordered columns, ordered rows.
///
/// `batch` holds the materialized rows, which may be fewer than the rows the
/// query produced. `total_rows` is always the exact count.
#[derive(Clone, Debug)]
pub struct ResultSet {
    batch: RecordBatch,
    total_rows: usize,
}

impl ResultSet {
    pub fn new(batch: RecordBatch, total_rows: usize) -> Self {
        let total_rows = total_rows.max(batch.num_rows());
        Self { batch, total_rows }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Rows actually held in memory.
    pub fn materialized_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Rows the query produced.
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows == 0
    }

    /// Plain-text table of at most `max_rows` rows, columns right-aligned,
    /// without a row index.
    pub fn render_text(&self, max_rows: usize) -> String {
        let shown = self.batch.num_rows().min(max_rows);
        let options = FormatOptions::default().with_null("NULL");
        let schema = self.batch.schema();

        let mut columns: Vec<Vec<String>> = Vec::with_capacity(schema.fields().len());
        for (idx, field) in schema.fields().iter().enumerate() {
            let mut cells = Vec::with_capacity(shown + 1);
            cells.push(field.name().clone());
            match ArrayFormatter::try_new(self.batch.column(idx).as_ref(), &options) {
                Ok(formatter) => {
                    for row in 0..shown {
                        let cell = formatter
                            .value(row)
                            .try_to_string()
                            .unwrap_or_else(|_| "?".to_string());
                        cells.push(cell);
                    }
                }
                Err(_) => cells.extend(std::iter::repeat("?".to_string()).take(shown)),
            }
            columns.push(cells);
        }

        let widths: Vec<usize> = columns
            .iter()
            .map(|cells| cells.iter().map(|c| c.chars().count()).max().unwrap_or(0))
            .collect();

        let mut lines = Vec::with_capacity(shown + 1);
        for row in 0..=shown {
            let line = columns
                .iter()
                .zip(&widths)
                .map(|(cells, width)| format!("{:>width$}", cells[row], width = *width))
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn sample() -> ResultSet {
        let schema = Arc::new(Schema::new(vec![
            Field::new("airline", DataType::Utf8, true),
            Field::new("offloaded", DataType::Int64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec![Some("PIA"), Some("Emirates"), None])),
            Arc::new(Int64Array::from(vec![Some(120), Some(7), Some(3)])),
        ];
        let batch = RecordBatch::try_new(schema, columns).unwrap();
        ResultSet::new(batch, 3)
    }

    #[test]
    fn renders_aligned_table() {
        let text = sample().render_text(50);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], " airline offloaded");
        assert_eq!(lines[1], "     PIA       120");
        assert_eq!(lines[3], "    NULL         3");
    }

    #[test]
    fn render_caps_rows() {
        let text = sample().render_text(1);
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn total_never_below_materialized() {
        let rs = sample();
        let again = ResultSet::new(rs.batch().clone(), 0);
        assert_eq!(again.total_rows(), 3);
        assert_eq!(rs.column_names(), vec!["airline", "offloaded"]);
    }
}
