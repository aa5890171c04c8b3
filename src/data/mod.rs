pub mod additional;
pub mod loader;
pub mod panel;

pub use additional::{AdditionalData, TransactionRecord};
pub use loader::{load_panel_csv, load_transactions_csv, write_panel_csv, write_transactions_csv};
pub use panel::Panel;
