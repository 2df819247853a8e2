//! drivecrawl-gdrive - Google Drive and Sheets backends for drivecrawl
//!
//! Blocking clients over a shared tokio runtime: [`DriveConnector`] opens a
//! [`drive::DriveTree`] per crawl worker, [`SheetsConnector`] backs the
//! spreadsheet sink. Both authenticate from a token file ([`TokenStore`]).

pub mod credential;
pub mod drive;
pub mod http;
pub mod sheets;

pub use credential::{Credential, TokenStore};
pub use drive::{DriveConnector, DriveTree};
pub use sheets::{SheetsClient, SheetsConnector};
