//! Keyboard navigation over a virtualized grid
//!
//! Addresses are `(row, focusable column)` pairs and do not depend on which
//! rows are mounted. Moving to a cell whose row is not mounted asks the
//! [`Viewport`] to reveal it, waits one frame and looks again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::actors::SessionHandle;
use crate::cell::CellEditor;
use crate::error::SessionError;

/// Position of a cell. `column` indexes focusable columns only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub row: usize,
    pub column: usize,
}

impl CellAddress {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub field: String,
    pub focusable: bool,
}

impl Column {
    pub fn editable(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            focusable: true,
        }
    }

    pub fn read_only(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            focusable: false,
        }
    }
}

/// Column order with the subset that can take focus
#[derive(Debug, Clone, Default)]
pub struct ColumnLayout {
    columns: Vec<Column>,
    focusable: Vec<usize>,
}

impl ColumnLayout {
    pub fn new(columns: Vec<Column>) -> Self {
        let focusable = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.focusable)
            .map(|(i, _)| i)
            .collect();
        Self { columns, focusable }
    }

    pub fn focusable_count(&self) -> usize {
        self.focusable.len()
    }

    /// Display index of a focusable column
    pub fn column_index(&self, focusable: usize) -> Option<usize> {
        self.focusable.get(focusable).copied()
    }

    pub fn field(&self, focusable: usize) -> Option<&str> {
        self.column_index(focusable)
            .and_then(|i| self.columns.get(i))
            .map(|c| c.field.as_str())
    }
}

/// Something a mounted cell exposes so it can take keyboard focus
pub trait FocusTarget: Send + Sync {
    /// Returns false when the element refused focus
    fn focus(&self) -> bool;
}

/// Focus handles of currently mounted cells
#[derive(Clone, Default)]
pub struct FocusRegistry {
    targets: Arc<Mutex<HashMap<CellAddress, Arc<dyn FocusTarget>>>>,
}

impl FocusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CellAddress, Arc<dyn FocusTarget>>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, address: CellAddress, target: Arc<dyn FocusTarget>) {
        self.lock().insert(address, target);
    }

    pub fn unregister(&self, address: CellAddress) {
        self.lock().remove(&address);
    }

    /// Drop every handle of a row, e.g. when it scrolls out
    pub fn unregister_row(&self, row: usize) {
        self.lock().retain(|address, _| address.row != row);
    }

    pub fn get(&self, address: CellAddress) -> Option<Arc<dyn FocusTarget>> {
        self.lock().get(&address).cloned()
    }

    pub fn is_mounted(&self, address: CellAddress) -> bool {
        self.lock().contains_key(&address)
    }
}

/// Scroll container of a virtualized grid
#[async_trait]
pub trait Viewport: Send + Sync {
    /// Ask for `row` to be scrolled into view and mounted
    fn reveal_row(&self, row: usize);

    /// Resolves once the next frame has rendered
    async fn next_frame(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    Focused(CellAddress),
    /// Still not mounted after a reveal and one frame
    Unreachable(CellAddress),
    /// The move would leave the grid
    OutOfBounds,
}

pub struct GridNavigator<V: Viewport> {
    layout: ColumnLayout,
    registry: FocusRegistry,
    viewport: V,
    row_count: usize,
    active: Option<CellAddress>,
}

impl<V: Viewport> GridNavigator<V> {
    pub fn new(layout: ColumnLayout, registry: FocusRegistry, viewport: V, row_count: usize) -> Self {
        Self {
            layout,
            registry,
            viewport,
            row_count,
            active: None,
        }
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn active(&self) -> Option<CellAddress> {
        self.active
    }

    /// Mark a cell active without moving focus, e.g. on click
    pub fn set_active(&mut self, address: CellAddress) {
        self.active = Some(address);
    }

    pub fn set_row_count(&mut self, row_count: usize) {
        self.row_count = row_count;
    }

    /// Cell a move would land on, or `None` at the grid's edge
    pub fn target(&self, direction: Direction) -> Option<CellAddress> {
        let from = self.active?;
        let columns = self.layout.focusable_count();
        let to = match direction {
            Direction::Next => CellAddress::new(from.row, from.column + 1),
            Direction::Prev => CellAddress::new(from.row, from.column.checked_sub(1)?),
            Direction::Down => CellAddress::new(from.row + 1, from.column),
            Direction::Up => CellAddress::new(from.row.checked_sub(1)?, from.column),
        };
        (to.row < self.row_count && to.column < columns).then_some(to)
    }

    /// Focus a cell, revealing its row first when it is not mounted
    pub async fn focus_cell(&mut self, address: CellAddress) -> FocusOutcome {
        if let Some(target) = self.registry.get(address) {
            if target.focus() {
                self.active = Some(address);
                return FocusOutcome::Focused(address);
            }
        }

        self.viewport.reveal_row(address.row);
        self.viewport.next_frame().await;

        match self.registry.get(address) {
            Some(target) if target.focus() => {
                self.active = Some(address);
                FocusOutcome::Focused(address)
            }
            _ => {
                tracing::debug!(row = address.row, column = address.column, "Cell unreachable");
                FocusOutcome::Unreachable(address)
            }
        }
    }

    /// Commit the active editor, then move focus
    pub async fn navigate(
        &mut self,
        direction: Direction,
        editor: Option<&mut CellEditor>,
        session: &SessionHandle,
    ) -> Result<FocusOutcome, SessionError> {
        if let Some(editor) = editor {
            editor.commit(session).await?;
        }
        match self.target(direction) {
            Some(address) => Ok(self.focus_cell(address).await),
            None => Ok(FocusOutcome::OutOfBounds),
        }
    }

    pub async fn move_next(
        &mut self,
        editor: Option<&mut CellEditor>,
        session: &SessionHandle,
    ) -> Result<FocusOutcome, SessionError> {
        self.navigate(Direction::Next, editor, session).await
    }

    pub async fn move_prev(
        &mut self,
        editor: Option<&mut CellEditor>,
        session: &SessionHandle,
    ) -> Result<FocusOutcome, SessionError> {
        self.navigate(Direction::Prev, editor, session).await
    }

    pub async fn move_down(
        &mut self,
        editor: Option<&mut CellEditor>,
        session: &SessionHandle,
    ) -> Result<FocusOutcome, SessionError> {
        self.navigate(Direction::Down, editor, session).await
    }

    pub async fn move_up(
        &mut self,
        editor: Option<&mut CellEditor>,
        session: &SessionHandle,
    ) -> Result<FocusOutcome, SessionError> {
        self.navigate(Direction::Up, editor, session).await
    }
}
