pub mod installments;
pub mod ledger;
pub mod ledger_sync;
pub mod linker;
pub mod money;
pub mod report;
pub mod search_filter;
