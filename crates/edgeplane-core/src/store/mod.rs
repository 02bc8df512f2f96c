// ── Document store ──
//
// Devices, tunnels and organizations keyed by id, with targeted
// sub-document updates and staged multi-document transactions.

mod collection;
mod data_store;
mod inventory;
mod transaction;

pub use data_store::DataStore;
pub use inventory::Inventory;
pub use transaction::Transaction;
