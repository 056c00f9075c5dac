pub mod addr;
pub mod conntrack;
pub mod filter;
pub mod layout;
pub mod resolve;
pub mod single;
pub mod sort;
pub mod tui;
pub mod types;
pub mod viewport;
