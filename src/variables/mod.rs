//! Variable system.
//!
//! A transaction keeps every variable in a [`VariableStore`]. Rules and
//! macros read it through [`VariableSelector`]s; the transaction writes it
//! while ingesting request and response data.

mod collection;
mod selector;
mod store;
mod variable;

pub use collection::{Collection, CollectionRef, MatchData, MultiMap, Scalar, Union};
pub use selector::{KeyException, VariableSelector};
pub use store::VariableStore;
pub use variable::{KeyCase, Variable};
