//! Shared application fixtures.
//!
//! A small two-branch application used across the test suites:
//!
//! - `counter`: [`CounterState`], driven by `INCREMENT`, `DECREMENT`, `SET` and `FAIL`
//! - `items`: [`ItemsState`], driven by `ADD_ITEM` and `SET_LOADING`
//!
//! `SEARCH` and `UNKNOWN` are handled by no reducer.

use serde::{Deserialize, Serialize};
use storex_core::action::{Action, ActionKind};
use storex_core::composition::CombinedReducer;
use storex_core::draft::Draft;
use storex_core::reducer::{Reducer, ReducerError};
use storex_core::state::StateTree;
use storex_runtime::StoreBuilder;

/// Branch key of the counter.
pub const COUNTER: &str = "counter";

/// Branch key of the item list.
pub const ITEMS: &str = "items";

/// Payload of every fixture action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppAction {
    /// `count + 1`
    Increment,
    /// `count - 1`
    Decrement,
    /// `count = n`
    Set(i64),
    /// Makes the counter reducer fail with the message.
    Fail(String),
    /// Appends an item and marks the list as loading.
    AddItem(String),
    /// Sets the loading flag.
    SetLoading(bool),
    /// Search query; ignored by every reducer.
    Search(String),
    /// Ignored by every reducer.
    Unknown,
}

impl ActionKind for AppAction {
    fn action_type(&self) -> &'static str {
        match self {
            Self::Increment => "INCREMENT",
            Self::Decrement => "DECREMENT",
            Self::Set(_) => "SET",
            Self::Fail(_) => "FAIL",
            Self::AddItem(_) => "ADD_ITEM",
            Self::SetLoading(_) => "SET_LOADING",
            Self::Search(_) => "SEARCH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Build an action whose type matches the payload variant.
#[must_use]
pub fn act(payload: AppAction) -> Action<AppAction> {
    Action::of(payload)
}

/// Counter branch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    /// Current count.
    pub count: i64,
}

/// Reducer for the counter branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterReducer;

impl Reducer for CounterReducer {
    type State = CounterState;
    type Action = AppAction;

    fn initial_state(&self) -> Option<CounterState> {
        Some(CounterState::default())
    }

    fn reduce(&self, state: &mut Draft<CounterState>, action: &Action<AppAction>) -> Result<(), ReducerError> {
        match action.payload() {
            AppAction::Increment => state.count += 1,
            AppAction::Decrement => state.count -= 1,
            AppAction::Set(value) => state.count = *value,
            AppAction::Fail(message) => return Err(ReducerError::new(message.clone())),
            _ => {},
        }
        Ok(())
    }
}

/// Item list branch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsState {
    /// Items in insertion order.
    pub items: Vec<String>,
    /// Whether an item is being processed.
    pub loading: bool,
}

/// Reducer for the item list branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemsReducer;

impl Reducer for ItemsReducer {
    type State = ItemsState;
    type Action = AppAction;

    fn initial_state(&self) -> Option<ItemsState> {
        Some(ItemsState::default())
    }

    fn reduce(&self, state: &mut Draft<ItemsState>, action: &Action<AppAction>) -> Result<(), ReducerError> {
        match action.payload() {
            AppAction::AddItem(item) => {
                state.items.push(item.clone());
                state.loading = true;
            },
            AppAction::SetLoading(loading) => state.loading = *loading,
            _ => {},
        }
        Ok(())
    }
}

/// Both fixture branches, `counter` first.
#[must_use]
pub fn app_reducers() -> CombinedReducer<AppAction> {
    CombinedReducer::new()
        .branch(COUNTER, CounterReducer)
        .branch(ITEMS, ItemsReducer)
}

/// A builder with only the counter branch registered.
#[must_use]
pub fn counter_builder() -> StoreBuilder<AppAction> {
    StoreBuilder::new().register_reducer(COUNTER, CounterReducer)
}

/// A builder with both fixture branches registered.
#[must_use]
pub fn app_builder() -> StoreBuilder<AppAction> {
    StoreBuilder::new().register_reducers(app_reducers())
}

/// The count in `state`, or `0` if the branch is missing.
#[must_use]
pub fn count(state: &StateTree) -> i64 {
    state.get::<CounterState>(COUNTER).map_or(0, |counter| counter.count)
}

/// The item list in `state`, or an empty list if the branch is missing.
#[must_use]
pub fn items(state: &StateTree) -> Vec<String> {
    state
        .get::<ItemsState>(ITEMS)
        .map(|branch| branch.items.clone())
        .unwrap_or_default()
}

/// The loading flag in `state`.
#[must_use]
pub fn loading(state: &StateTree) -> bool {
    state.get::<ItemsState>(ITEMS).is_some_and(|branch| branch.loading)
}
