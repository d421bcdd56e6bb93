use std::fmt;
use std::str::FromStr;

use mangaport_core::EnrichedItem;
use serde::Serialize;

/// Output formats written by [`export_results`](crate::export_results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// MyAnimeList-importable XML.
    Xml,
    /// Self-contained browsable report.
    Html,
    /// Raw dump of the enriched list.
    Json,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Xml, ExportFormat::Html, ExportFormat::Json];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xml => "xml",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
        }
    }

    /// File stem segment: `mangaport_<kind>_<stamp>.<ext>`.
    pub fn kind(self) -> &'static str {
        match self {
            ExportFormat::Xml => "export",
            ExportFormat::Html => "report",
            ExportFormat::Json => "data",
        }
    }

    pub fn file_name(self, stamp: &str) -> String {
        format!("mangaport_{}_{stamp}.{}", self.kind(), self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" | "mal" => Ok(ExportFormat::Xml),
            "html" | "report" => Ok(ExportFormat::Html),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{other}' (expected xml, html or json)")),
        }
    }
}

/// Settings for the MyAnimeList XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalXmlOptions {
    pub user_name: String,
    /// Value of `<my_status>` for every entry.
    pub status: String,
    /// Write unmatched items with the `"0"` id instead of leaving them out.
    pub include_unmatched: bool,
}

impl Default for MalXmlOptions {
    fn default() -> Self {
        Self {
            user_name: "mangaport_export".to_string(),
            status: "Plan to Read".to_string(),
            include_unmatched: true,
        }
    }
}

/// Header numbers for the HTML report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub found: usize,
    pub not_found: usize,
    /// Percentage of items matched, 0 for an empty list.
    pub success_rate: f64,
}

impl ReportSummary {
    pub fn from_items(items: &[EnrichedItem]) -> Self {
        let total = items.len();
        let found = items.iter().filter(|i| i.is_matched()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            found as f64 / total as f64 * 100.0
        };
        Self {
            total,
            found,
            not_found: total - found,
            success_rate,
        }
    }
}
