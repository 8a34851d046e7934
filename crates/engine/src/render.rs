//! Per-type cell presentation and input handling, dispatched through a
//! strategy table keyed by column type.

use std::collections::HashMap;

use fieldgrid_core::{CellValue, FieldType};

use crate::columns::{CATEGORY_LINK, GridColumn, SHOP_LINK};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorKind {
    TextInput,
    NumberInput,
    TextArea,
    DatePicker,
    Select { options: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTone {
    Success,
    Warning,
    Danger,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellDisplay {
    Empty,
    Plain(String),
    Badge { label: String, tone: BadgeTone },
    Link { label: String, href: String },
    /// Unmapped value shown as-is: the column is unknown or the stored value
    /// does not match the column type.
    Raw(String),
}

pub trait CellStrategy: Send + Sync {
    fn editor(&self, column: &GridColumn) -> EditorKind;

    fn format(&self, value: &CellValue, column: &GridColumn) -> CellDisplay;

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError>;
}

/// Column-supplied read-mode formatter. Returning `None` falls back to the
/// type default.
pub type Formatter = Box<dyn Fn(&CellValue) -> Option<CellDisplay> + Send + Sync>;

fn parse_typed(field_type: FieldType, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
    CellValue::parse_as(field_type, input).map_err(|e| EngineError::Validation {
        column: column.id.clone(),
        reason: e.to_string(),
    })
}

fn plain(value: &CellValue) -> CellDisplay {
    if value.is_null() {
        CellDisplay::Empty
    } else {
        CellDisplay::Plain(value.display())
    }
}

struct TextStrategy;

impl CellStrategy for TextStrategy {
    fn editor(&self, _column: &GridColumn) -> EditorKind {
        EditorKind::TextInput
    }

    fn format(&self, value: &CellValue, _column: &GridColumn) -> CellDisplay {
        plain(value)
    }

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
        parse_typed(FieldType::Text, input, column)
    }
}

struct TextareaStrategy;

impl CellStrategy for TextareaStrategy {
    fn editor(&self, _column: &GridColumn) -> EditorKind {
        EditorKind::TextArea
    }

    fn format(&self, value: &CellValue, _column: &GridColumn) -> CellDisplay {
        match value {
            CellValue::Text(s) => match s.lines().next() {
                Some(first) if first.len() < s.len() => CellDisplay::Plain(format!("{first}…")),
                _ => plain(value),
            },
            _ => plain(value),
        }
    }

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
        parse_typed(FieldType::Textarea, input, column)
    }
}

struct NumberStrategy;

impl CellStrategy for NumberStrategy {
    fn editor(&self, _column: &GridColumn) -> EditorKind {
        EditorKind::NumberInput
    }

    fn format(&self, value: &CellValue, _column: &GridColumn) -> CellDisplay {
        match value {
            CellValue::Null | CellValue::Number(_) => plain(value),
            other => CellDisplay::Raw(other.display()),
        }
    }

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
        parse_typed(FieldType::Number, input, column)
    }
}

struct DateStrategy;

impl CellStrategy for DateStrategy {
    fn editor(&self, _column: &GridColumn) -> EditorKind {
        EditorKind::DatePicker
    }

    fn format(&self, value: &CellValue, _column: &GridColumn) -> CellDisplay {
        match value {
            CellValue::Null | CellValue::Date(_) => plain(value),
            other => CellDisplay::Raw(other.display()),
        }
    }

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
        parse_typed(FieldType::Date, input, column)
    }
}

struct SelectStrategy;

impl SelectStrategy {
    fn tone(value: &str) -> BadgeTone {
        match value {
            "active" => BadgeTone::Success,
            "pending" | "inactive" => BadgeTone::Warning,
            "expired" | "revoked" | "suspended" => BadgeTone::Danger,
            _ => BadgeTone::Neutral,
        }
    }
}

impl CellStrategy for SelectStrategy {
    fn editor(&self, column: &GridColumn) -> EditorKind {
        EditorKind::Select {
            options: column.options.clone().unwrap_or_default(),
        }
    }

    fn format(&self, value: &CellValue, column: &GridColumn) -> CellDisplay {
        let CellValue::Text(label) = value else {
            return plain(value);
        };
        let known = column
            .options
            .as_ref()
            .is_some_and(|options| options.iter().any(|o| o == label));
        if column.badge && known {
            CellDisplay::Badge {
                label: label.clone(),
                tone: Self::tone(label),
            }
        } else {
            CellDisplay::Plain(label.clone())
        }
    }

    fn parse(&self, input: &str, column: &GridColumn) -> Result<CellValue, EngineError> {
        let value = parse_typed(FieldType::Select, input, column)?;
        let allowed = match (&value, &column.options) {
            (CellValue::Text(choice), Some(options)) if !options.is_empty() => {
                options.iter().any(|o| o == choice)
            }
            _ => true,
        };
        if !allowed {
            return Err(EngineError::Validation {
                column: column.id.clone(),
                reason: format!("{input:?} is not one of the column's options"),
            });
        }
        Ok(value)
    }
}

/// Builds a formatter that turns a foreign-key number into a hyperlink.
pub fn link_formatter(base_path: &'static str, labels: HashMap<i64, String>) -> Formatter {
    Box::new(move |value| {
        let id = value.as_number()?;
        if id.fract() != 0.0 {
            return None;
        }
        let id = id as i64;
        Some(CellDisplay::Link {
            label: labels.get(&id).cloned().unwrap_or_else(|| format!("#{id}")),
            href: format!("{base_path}/{id}"),
        })
    })
}

pub struct StrategyTable {
    strategies: HashMap<FieldType, Box<dyn CellStrategy>>,
    formatters: HashMap<String, Formatter>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyTable {
    pub fn new() -> Self {
        let mut table = Self {
            strategies: HashMap::new(),
            formatters: HashMap::new(),
        };
        table.register(FieldType::Text, Box::new(TextStrategy));
        table.register(FieldType::Textarea, Box::new(TextareaStrategy));
        table.register(FieldType::Number, Box::new(NumberStrategy));
        table.register(FieldType::Date, Box::new(DateStrategy));
        table.register(FieldType::Select, Box::new(SelectStrategy));
        table.register_formatter(SHOP_LINK, link_formatter("/shops", HashMap::new()));
        table.register_formatter(CATEGORY_LINK, link_formatter("/license-categories", HashMap::new()));
        table
    }

    pub fn register(&mut self, field_type: FieldType, strategy: Box<dyn CellStrategy>) {
        self.strategies.insert(field_type, strategy);
    }

    pub fn register_formatter(&mut self, name: &str, formatter: Formatter) {
        self.formatters.insert(name.to_string(), formatter);
    }

    fn strategy(&self, field_type: FieldType) -> &dyn CellStrategy {
        match self.strategies.get(&field_type) {
            Some(strategy) => strategy.as_ref(),
            None => &TextStrategy,
        }
    }

    pub fn editor(&self, column: &GridColumn) -> EditorKind {
        self.strategy(column.column_type).editor(column)
    }

    pub fn parse(&self, column: &GridColumn, input: &str) -> Result<CellValue, EngineError> {
        self.strategy(column.column_type).parse(input, column)
    }

    /// Read-mode rendering. A missing column renders the raw value.
    pub fn render(&self, column: Option<&GridColumn>, value: &CellValue) -> CellDisplay {
        let Some(column) = column else {
            return if value.is_null() {
                CellDisplay::Empty
            } else {
                CellDisplay::Raw(value.display())
            };
        };
        if let Some(display) = column
            .formatter
            .as_ref()
            .and_then(|name| self.formatters.get(name))
            .and_then(|formatter| formatter(value))
        {
            return display;
        }
        self.strategy(column.column_type).format(value, column)
    }
}
