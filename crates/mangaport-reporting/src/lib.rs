pub mod export;
pub mod types;

pub use export::{export_html, export_json, export_mal_xml, export_results, ExportError};
pub use types::{ExportFormat, MalXmlOptions, ReportSummary};
