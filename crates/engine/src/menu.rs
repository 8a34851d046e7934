use fieldgrid_core::{FieldType, RowId};

use crate::columns::GridColumn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MenuTarget {
    Row(RowId),
    Column(String),
    Cell { row: RowId, column: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Row,
    Column,
    Cell,
}

impl MenuTarget {
    pub fn kind(&self) -> MenuKind {
        match self {
            Self::Row(_) => MenuKind::Row,
            Self::Column(_) => MenuKind::Column,
            Self::Cell { .. } => MenuKind::Cell,
        }
    }

    pub fn row(&self) -> Option<&RowId> {
        match self {
            Self::Row(row) | Self::Cell { row, .. } => Some(row),
            Self::Column(_) => None,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Column(column) | Self::Cell { column, .. } => Some(column),
            Self::Row(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMenu {
    pub target: MenuTarget,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    EditCell,
    ClearCell,
    AddRowBelow,
    DuplicateRow,
    DeleteRow,
    RenameColumn,
    ChangeColumnType(FieldType),
    DeleteColumn,
    AddColumn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarAction {
    AddRow,
    AddColumn {
        field_name: String,
        label: String,
        field_type: FieldType,
        options: Option<Vec<String>>,
    },
    Refresh,
}

/// Entries offered for a target. Only custom columns can be retyped or
/// deleted; read-only columns offer no cell edits.
pub fn menu_items(target: &MenuTarget, column: Option<&GridColumn>) -> Vec<MenuAction> {
    match target {
        MenuTarget::Row(_) => vec![
            MenuAction::AddRowBelow,
            MenuAction::DuplicateRow,
            MenuAction::DeleteRow,
        ],
        MenuTarget::Column(_) => {
            let mut items = vec![MenuAction::RenameColumn, MenuAction::AddColumn];
            if let Some(column) = column.filter(|c| c.is_custom) {
                items.extend(
                    FieldType::ALL
                        .into_iter()
                        .filter(|t| *t != column.column_type)
                        .map(MenuAction::ChangeColumnType),
                );
                items.push(MenuAction::DeleteColumn);
            }
            items
        }
        MenuTarget::Cell { .. } => {
            let mut items = Vec::new();
            if column.is_some_and(|c| c.editable) {
                items.push(MenuAction::EditCell);
                items.push(MenuAction::ClearCell);
            }
            items.extend([
                MenuAction::AddRowBelow,
                MenuAction::DuplicateRow,
                MenuAction::DeleteRow,
            ]);
            items
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::system_column;
    use fieldgrid_core::{EntityId, EntityType};

    #[test]
    fn only_custom_columns_can_be_deleted() {
        let system = system_column(EntityType::Shop, "name").unwrap();
        let custom = GridColumn::custom("cf_floor", "Floor", FieldType::Number, 100);
        let target = MenuTarget::Column("x".into());

        let system_items = menu_items(&target, Some(&system));
        assert!(!system_items.contains(&MenuAction::DeleteColumn));
        assert!(system_items.contains(&MenuAction::RenameColumn));

        let custom_items = menu_items(&target, Some(&custom));
        assert!(custom_items.contains(&MenuAction::DeleteColumn));
        assert!(custom_items.contains(&MenuAction::ChangeColumnType(FieldType::Text)));
        assert!(!custom_items.contains(&MenuAction::ChangeColumnType(FieldType::Number)));
    }

    #[test]
    fn read_only_cells_offer_row_actions_only() {
        let created = system_column(EntityType::Shop, "created_at").unwrap();
        let target = MenuTarget::Cell {
            row: RowId::Persisted(EntityId::new(1)),
            column: "created_at".into(),
        };
        let items = menu_items(&target, Some(&created));
        assert_eq!(
            items,
            vec![MenuAction::AddRowBelow, MenuAction::DuplicateRow, MenuAction::DeleteRow]
        );
        assert_eq!(target.kind(), MenuKind::Cell);
    }
}
