pub mod counterparty;
pub mod outcome;
pub mod quote_unit;
pub mod request;
