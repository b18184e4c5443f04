pub mod browser;
pub mod download;
pub mod links;

pub use browser::SharedBrowser;
pub use download::{gated_domain, Acquirer};
pub use links::{extract_links, normalize_url, PaperLink};
