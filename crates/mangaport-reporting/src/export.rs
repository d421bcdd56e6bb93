use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use mangaport_core::{ConfidenceTier, EnrichedItem, UNMATCHED_ID};
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::types::{ExportFormat, MalXmlOptions, ReportSummary};

/// Catalog page for a matched id.
const CATALOG_ENTRY_URL: &str = "https://myanimelist.net/manga/";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML write error: {0}")]
    Xml(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Render a MyAnimeList import document.
///
/// Unmatched items carry the `"0"` id unless `options.include_unmatched` is
/// off, in which case they are left out and `user_total_manga` counts only
/// the written entries.
pub fn export_mal_xml(items: &[EnrichedItem], options: &MalXmlOptions) -> Result<String, ExportError> {
    let entries: Vec<&EnrichedItem> = items
        .iter()
        .filter(|i| options.include_unmatched || i.is_matched())
        .collect();

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_xml(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_xml(&mut writer, Event::Start(BytesStart::new("myanimelist")))?;

    write_xml(&mut writer, Event::Start(BytesStart::new("myinfo")))?;
    write_text_element(&mut writer, "user_name", &options.user_name)?;
    write_text_element(&mut writer, "user_export_type", "2")?;
    write_text_element(&mut writer, "user_total_manga", &entries.len().to_string())?;
    write_xml(&mut writer, Event::End(BytesEnd::new("myinfo")))?;

    for item in entries {
        write_xml(&mut writer, Event::Start(BytesStart::new("manga")))?;
        write_text_element(&mut writer, "manga_mangadb_id", &item.catalog_id)?;
        write_text_element(&mut writer, "manga_title", &item.title)?;
        write_text_element(&mut writer, "my_status", &options.status)?;
        write_text_element(&mut writer, "manga_source_url", &item.url)?;
        write_xml(&mut writer, Event::End(BytesEnd::new("manga")))?;
    }

    write_xml(&mut writer, Event::End(BytesEnd::new("myanimelist")))?;

    let mut xml =
        String::from_utf8(writer.into_inner()).map_err(|e| ExportError::Xml(e.to_string()))?;
    xml.push('\n');
    Ok(xml)
}

fn write_xml(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ExportError> {
    writer
        .write_event(event)
        .map_err(|e| ExportError::Xml(e.to_string()))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), ExportError> {
    write_xml(writer, Event::Start(BytesStart::new(name)))?;
    write_xml(writer, Event::Text(BytesText::new(text)))?;
    write_xml(writer, Event::End(BytesEnd::new(name)))
}

/// Render the enriched list as pretty-printed JSON.
pub fn export_json(items: &[EnrichedItem]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(items)?)
}

/// Render a self-contained HTML report.
///
/// Matched items come first, then unmatched, each group sorted by lowercase
/// title. All scraped text is escaped.
pub fn export_html(items: &[EnrichedItem], generated_on: &str) -> String {
    let summary = ReportSummary::from_items(items);

    let mut sorted: Vec<&EnrichedItem> = items.iter().collect();
    sorted.sort_by_cached_key(|i| (!i.is_matched(), i.title.to_lowercase()));

    let mut html = String::with_capacity(4096 + items.len() * 512);
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Manga Export - {date}</title>
<style>{STYLE}</style>
</head>
<body>
<div class="container">
<header>
<h1>Manga Export</h1>
<p class="generated">Generated {date}</p>
<div class="stats">
<div class="stat"><span class="stat-value">{total}</span><span class="stat-label">Total Manga</span></div>
<div class="stat"><span class="stat-value">{found}</span><span class="stat-label">Found on MAL</span></div>
<div class="stat"><span class="stat-value">{not_found}</span><span class="stat-label">Not Found</span></div>
<div class="stat"><span class="stat-value">{rate:.1}%</span><span class="stat-label">Success Rate</span></div>
</div>
</header>
<div class="controls">
<input type="text" id="search" placeholder="Search manga...">
<button class="filter-btn active" data-filter="all">All</button>
<button class="filter-btn" data-filter="found">Found</button>
<button class="filter-btn" data-filter="not-found">Not Found</button>
</div>
<div class="manga-list" id="list">
"#,
        date = escape(generated_on),
        total = summary.total,
        found = summary.found,
        not_found = summary.not_found,
        rate = summary.success_rate,
    );

    for item in sorted {
        html.push_str(&render_item(item));
    }

    html.push_str("</div>\n</div>\n<script>");
    html.push_str(SCRIPT);
    html.push_str("</script>\n</body>\n</html>\n");
    html
}

fn render_item(item: &EnrichedItem) -> String {
    let (status, info, catalog_link) = match item.tier() {
        Some(tier) => {
            let badge = match tier {
                ConfidenceTier::High => "badge-high",
                ConfidenceTier::Medium => "badge-medium",
                ConfidenceTier::Low => "badge-low",
            };
            let matched = item.matched_title.as_deref().unwrap_or(&item.title);
            (
                "found",
                format!(
                    r#"MAL: {}<span class="badge {badge}">{} {:.0}% match</span>"#,
                    escape(matched),
                    tier.label(),
                    item.confidence * 100.0
                ),
                format!(
                    r#"<a href="{CATALOG_ENTRY_URL}{}" class="manga-link mal-link" target="_blank">MAL</a>"#,
                    escape(&item.catalog_id)
                ),
            )
        }
        None => (
            "not-found",
            "Not found on MyAnimeList".to_string(),
            r##"<a href="#" class="manga-link mal-link disabled">MAL</a>"##.to_string(),
        ),
    };

    let source_link: Cow<'_, str> = if item.url.is_empty() {
        Cow::Borrowed("")
    } else {
        Cow::Owned(format!(
            r#"<a href="{}" class="manga-link source-link" target="_blank">Source</a>"#,
            escape(&item.url)
        ))
    };

    format!(
        r#"<div class="manga-item" data-status="{status}">
<div class="manga-status status-{status}"></div>
<div class="manga-content"><div class="manga-title">{title}</div><div class="manga-info">{info}</div></div>
<div class="manga-links">{catalog_link}{source_link}</div>
</div>
"#,
        title = escape(&item.title),
    )
}

/// Write the requested formats into `dir` and return the written paths.
///
/// Files are named `mangaport_<kind>_<stamp>.<ext>`; `dir` is created if
/// missing.
pub fn export_results(
    items: &[EnrichedItem],
    dir: &Path,
    formats: &[ExportFormat],
    stamp: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(formats.len());
    for &format in formats {
        let path = dir.join(format.file_name(stamp));
        let contents = match format {
            ExportFormat::Xml => export_mal_xml(items, &MalXmlOptions::default())?,
            ExportFormat::Html => {
                let date = chrono::Local::now().format("%Y-%m-%d").to_string();
                export_html(items, &date)
            }
            ExportFormat::Json => export_json(items)?,
        };
        std::fs::write(&path, contents)?;
        log::info!("wrote {} export to {}", format, path.display());
        written.push(path);
    }

    let unmatched = items.iter().filter(|i| i.catalog_id == UNMATCHED_ID).count();
    log::debug!("exported {} items ({unmatched} unmatched)", items.len());
    Ok(written)
}

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); min-height: 100vh; padding: 20px; }
.container { max-width: 1400px; margin: 0 auto; background: white; border-radius: 16px; overflow: hidden; box-shadow: 0 20px 60px rgba(0,0,0,0.3); }
header { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 50px; text-align: center; }
h1 { font-size: 3rem; margin-bottom: 10px; }
.generated { opacity: 0.8; }
.stats { display: flex; gap: 30px; justify-content: center; flex-wrap: wrap; margin-top: 30px; }
.stat { background: rgba(255,255,255,0.15); padding: 20px 30px; border-radius: 12px; min-width: 150px; }
.stat-value { display: block; font-size: 2.5rem; font-weight: bold; }
.stat-label { font-size: 0.9rem; opacity: 0.9; }
.controls { display: flex; gap: 10px; padding: 20px 30px; border-bottom: 1px solid #e5e7eb; flex-wrap: wrap; }
#search { flex: 1; min-width: 200px; padding: 12px 16px; border: 2px solid #e5e7eb; border-radius: 8px; font-size: 1rem; }
.filter-btn { padding: 12px 20px; border: 2px solid #e5e7eb; background: white; border-radius: 8px; cursor: pointer; font-weight: 600; }
.filter-btn.active { background: #667eea; color: white; border-color: #667eea; }
.manga-list { padding: 20px 30px; }
.manga-item { display: flex; align-items: center; gap: 15px; padding: 15px; border-bottom: 1px solid #f3f4f6; }
.manga-status { width: 10px; height: 10px; border-radius: 50%; flex-shrink: 0; }
.status-found { background: #10b981; }
.status-not-found { background: #ef4444; }
.manga-content { flex: 1; min-width: 0; }
.manga-title { font-weight: 600; color: #1f2937; }
.manga-info { font-size: 0.875rem; color: #6b7280; margin-top: 4px; }
.manga-links { display: flex; gap: 8px; }
.manga-link { padding: 6px 12px; border-radius: 6px; text-decoration: none; font-size: 0.875rem; font-weight: 600; }
.mal-link { background: #2e51a2; color: white; }
.source-link { background: #f3f4f6; color: #374151; }
.disabled { opacity: 0.4; pointer-events: none; }
.badge { display: inline-block; padding: 2px 8px; border-radius: 4px; font-size: 0.75rem; font-weight: 600; margin-left: 8px; }
.badge-high { background: #d1fae5; color: #065f46; }
.badge-medium { background: #fef3c7; color: #92400e; }
.badge-low { background: #fee2e2; color: #991b1b; }
"#;

const SCRIPT: &str = r#"
const search = document.getElementById('search');
const items = document.querySelectorAll('.manga-item');
const btns = document.querySelectorAll('.filter-btn');
let filter = 'all';
function update() {
  const value = search.value.toLowerCase();
  items.forEach(item => {
    const title = item.querySelector('.manga-title').textContent.toLowerCase();
    const matchesSearch = title.includes(value);
    const matchesFilter = filter === 'all' || item.dataset.status === filter;
    item.style.display = (matchesSearch && matchesFilter) ? 'flex' : 'none';
  });
}
search.addEventListener('input', update);
btns.forEach(btn => {
  btn.addEventListener('click', () => {
    btns.forEach(b => b.classList.remove('active'));
    btn.classList.add('active');
    filter = btn.dataset.filter;
    update();
  });
});
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(title: &str, id: &str, confidence: f64) -> EnrichedItem {
        EnrichedItem {
            title: title.into(),
            url: format!("https://example.com/title/{id}"),
            catalog_id: id.into(),
            matched_title: Some(title.into()),
            confidence,
        }
    }

    fn unmatched(title: &str) -> EnrichedItem {
        EnrichedItem {
            title: title.into(),
            url: "https://example.com/title/x".into(),
            catalog_id: UNMATCHED_ID.into(),
            matched_title: None,
            confidence: 0.0,
        }
    }

    #[test]
    fn mal_xml_has_header_and_one_entry_per_item() {
        let items = vec![matched("Berserk", "2", 1.0), unmatched("Chapter 5")];
        let xml = export_mal_xml(&items, &MalXmlOptions::default()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<user_export_type>2</user_export_type>"));
        assert!(xml.contains("<user_total_manga>2</user_total_manga>"));
        assert_eq!(xml.matches("<manga>").count(), 2);
        assert!(xml.contains("<manga_mangadb_id>2</manga_mangadb_id>"));
        assert!(xml.contains("<manga_mangadb_id>0</manga_mangadb_id>"));
        assert!(xml.contains("<my_status>Plan to Read</my_status>"));
    }

    #[test]
    fn mal_xml_can_leave_out_unmatched() {
        let items = vec![matched("Berserk", "2", 1.0), unmatched("Chapter 5")];
        let options = MalXmlOptions {
            include_unmatched: false,
            ..MalXmlOptions::default()
        };
        let xml = export_mal_xml(&items, &options).unwrap();
        assert_eq!(xml.matches("<manga>").count(), 1);
        assert!(xml.contains("<user_total_manga>1</user_total_manga>"));
    }

    #[test]
    fn mal_xml_escapes_titles() {
        let items = vec![matched("Tom & Jerry <3", "9", 0.9)];
        let xml = export_mal_xml(&items, &MalXmlOptions::default()).unwrap();
        assert!(xml.contains("<manga_title>Tom &amp; Jerry &lt;3</manga_title>"));
    }

    #[test]
    fn json_is_the_enriched_list() {
        let items = vec![matched("Berserk", "2", 1.0), unmatched("Chapter 5")];
        let json = export_json(&items).unwrap();
        let parsed: Vec<EnrichedItem> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, items);
    }

    #[test]
    fn html_puts_matched_first_sorted_by_title() {
        let items = vec![
            unmatched("zzz unknown"),
            matched("vagabond", "656", 0.95),
            unmatched("Abc unknown"),
            matched("Berserk", "2", 0.65),
        ];
        let html = export_html(&items, "2024-05-01");
        let pos = |needle: &str| html.find(needle).unwrap();
        assert!(pos(">Berserk<") < pos(">vagabond<"));
        assert!(pos(">vagabond<") < pos(">Abc unknown<"));
        assert!(pos(">Abc unknown<") < pos(">zzz unknown<"));
    }

    #[test]
    fn html_has_stats_badges_and_links() {
        let items = vec![matched("Berserk", "2", 0.95), matched("Monster", "1", 0.75), unmatched("Nope")];
        let html = export_html(&items, "2024-05-01");
        assert!(html.contains(r#"<span class="stat-value">3</span>"#));
        assert!(html.contains(r#"<span class="stat-value">66.7%</span>"#));
        assert!(html.contains(r#"badge badge-high">High 95% match"#));
        assert!(html.contains(r#"badge badge-medium">Med 75% match"#));
        assert!(html.contains("https://myanimelist.net/manga/2"));
        assert!(html.contains("Not found on MyAnimeList"));
        assert!(html.contains(r#"id="search""#));
    }

    #[test]
    fn html_unmatched_row_has_disabled_mal_link() {
        let items = vec![unmatched("Nope")];
        let html = export_html(&items, "2024-05-01");
        assert!(html.contains(r#"data-status="not-found""#));
        assert!(html.contains(r##"<a href="#" class="manga-link mal-link disabled">MAL</a>"##));
        assert!(!html.contains("myanimelist.net/manga/"));
    }

    #[test]
    fn html_escapes_scraped_text() {
        let items = vec![unmatched("<script>alert(1)</script>")];
        let html = export_html(&items, "2024-05-01");
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn export_results_writes_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("exports");
        let items = vec![matched("Berserk", "2", 1.0)];
        let paths = export_results(&items, &out, &ExportFormat::ALL, "20240501_120000").unwrap();

        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "mangaport_export_20240501_120000.xml",
                "mangaport_report_20240501_120000.html",
                "mangaport_data_20240501_120000.json",
            ]
        );
        for path in &paths {
            assert!(std::fs::metadata(path).unwrap().len() > 0);
        }
    }
}
