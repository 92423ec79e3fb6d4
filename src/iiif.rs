//! Mapping citations onto IIIF canvases and image targets.
//!
//! Rules are data, not code: `iiif_source_rules.csv` says, per edition, how
//! a citation row resolves to a canvas (by index into a cached manifest, or
//! by template). Rows that cannot be resolved land in needs-review queues
//! rather than being dropped silently.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::tabular::{read_csv, write_csv, RowMap};

pub const CITATION_IIIF_FIELDS: &[&str] = &[
    "edition_id",
    "citation_ref",
    "manifest_url",
    "canvas_id",
    "canvas_label",
    "canvas_index",
    "target_url",
    "status",
    "notes",
];

pub const MISSING_IIIF_FIELDS: &[&str] = &[
    "edition_id",
    "citation_ref",
    "reason",
    "citation_key_field",
    "citation_key_value",
    "source_file",
    "source_row",
];

pub const MISSING_MANIFEST_FIELDS: &[&str] =
    &["edition_id", "reason", "manifest_url", "status"];

pub const AMBIGUOUS_FIELDS: &[&str] = &["edition_id", "citation_ref", "reason", "targets"];

pub const BAD_ROWS_FIELDS: &[&str] =
    &["edition_id", "citation_ref", "reason", "source_file", "source_row"];

/// Editions outside the TEI corpus that are still expected to carry IIIF
/// rules; a missing rule for these is a review item, not business as usual.
pub const NON_TEI_IN_SCOPE: &[&str] =
    &["barbaro", "desmoulins", "lusitanus", "ruellius", "wechel"];

#[derive(Debug, Clone, Default)]
pub struct ManifestInfo {
    pub manifest_url: String,
    pub status: String,
    pub why_provisional: String,
}

#[derive(Debug, Clone)]
pub struct IiifRule {
    pub edition_id: String,
    pub manifest_url: String,
    pub citation_key_field: String,
    pub target_rule: String,
    pub target_template: String,
    pub canvas_index_base: Option<i64>,
}

/// Placeholder of the form `{{width%offset%field}}`: a zero-padded numeric
/// citation field with an additive offset.
static PADDED_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(\d+)%(-?\d+)%([A-Za-z0-9_.]+)\}\}").expect("padded field regex")
});

fn get(row: &RowMap, key: &str) -> String {
    row.get(key).cloned().unwrap_or_default()
}

fn parse_strict_int(value: &str) -> Option<i64> {
    let v = value.trim();
    if v.is_empty() || !v.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

// === Manifests and rules ===

fn load_manifest(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Canvas ids in manifest order, accepting both Presentation 3 (`items`)
/// and Presentation 2 (`sequences[0].canvases`) shapes.
pub fn extract_canvas_ids(manifest: &Value) -> Vec<String> {
    if let Some(items) = manifest.get("items").and_then(Value::as_array) {
        return items
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
    }
    if let Some(sequences) = manifest.get("sequences").and_then(Value::as_array) {
        if let Some(first) = sequences.first() {
            if let Some(canvases) = first.get("canvases").and_then(Value::as_array) {
                return canvases
                    .iter()
                    .filter_map(|c| {
                        c.get("@id").or_else(|| c.get("id")).and_then(Value::as_str)
                    })
                    .map(str::to_string)
                    .collect();
            }
        }
    }
    Vec::new()
}

fn load_manifest_infos(path: &Path) -> Result<BTreeMap<String, ManifestInfo>> {
    let (_, rows) = read_csv(path)?;
    let mut out = BTreeMap::new();
    for row in rows {
        out.insert(
            get(&row, "edition_id"),
            ManifestInfo {
                manifest_url: get(&row, "manifest_url"),
                status: get(&row, "status"),
                why_provisional: get(&row, "why_provisional"),
            },
        );
    }
    Ok(out)
}

fn load_rules(path: &Path) -> Result<BTreeMap<String, IiifRule>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let (_, rows) = read_csv(path)?;
    let mut out = BTreeMap::new();
    for row in rows {
        let edition_id = get(&row, "edition_id");
        let base = get(&row, "canvas_index_base");
        out.insert(
            edition_id.clone(),
            IiifRule {
                edition_id,
                manifest_url: get(&row, "manifest_url"),
                citation_key_field: get(&row, "citation_key_field"),
                target_rule: get(&row, "target_rule"),
                target_template: get(&row, "target_template"),
                canvas_index_base: parse_strict_int(&base),
            },
        );
    }
    Ok(out)
}

// === Citation field addressing ===

fn parse_extra_json(citation: &RowMap) -> BTreeMap<String, String> {
    let raw = get(citation, "extra_json");
    if raw.is_empty() {
        return BTreeMap::new();
    }
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect(),
        Ok(_) => BTreeMap::new(),
        Err(_) => {
            let mut m = BTreeMap::new();
            m.insert("_extra_json_parse_error".to_string(), raw);
            m
        }
    }
}

/// Fields prefixed `extra_json.` address keys inside the extra map.
fn citation_value(citation: &RowMap, field: &str, extra: &BTreeMap<String, String>) -> String {
    if let Some(key) = field.strip_prefix("extra_json.") {
        return extra.get(key).cloned().unwrap_or_default();
    }
    get(citation, field)
}

// === Template rendering ===

#[derive(Debug)]
enum TemplateError {
    MissingField,
}

fn render_template(
    template: &str,
    citation: &RowMap,
    extra: &BTreeMap<String, String>,
    context: &BTreeMap<String, String>,
) -> std::result::Result<String, TemplateError> {
    // First pass: numeric padded placeholders.
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PADDED_FIELD_RE.captures_iter(template) {
        let whole = caps.get(0).unwrap_or_else(|| unreachable!());
        rendered.push_str(&template[last..whole.start()]);
        last = whole.end();
        let width: usize = caps[1].parse().map_err(|_| TemplateError::MissingField)?;
        let offset: i64 = caps[2].parse().map_err(|_| TemplateError::MissingField)?;
        let value = citation_value(citation, &caps[3], extra);
        let Some(num) = parse_strict_int(&value) else {
            return Err(TemplateError::MissingField);
        };
        rendered.push_str(&format!("{:0width$}", num + offset, width = width));
    }
    rendered.push_str(&template[last..]);

    // Second pass: plain `{name}` substitution against the context map.
    let mut out = String::with_capacity(rendered.len());
    let mut chars = rendered.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                    name.push(inner);
                }
                let value = context.get(&name).ok_or(TemplateError::MissingField)?;
                out.push_str(value);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

// === Target building ===

fn map_row(
    citation: &RowMap,
    manifest_url: &str,
    status: &str,
    canvas_id: &str,
    canvas_label: &str,
    canvas_index: &str,
    target_url: &str,
) -> RowMap {
    let mut row = RowMap::new();
    row.insert("edition_id".to_string(), get(citation, "edition_id"));
    row.insert("citation_ref".to_string(), get(citation, "citation_ref"));
    row.insert("manifest_url".to_string(), manifest_url.to_string());
    row.insert("canvas_id".to_string(), canvas_id.to_string());
    row.insert("canvas_label".to_string(), canvas_label.to_string());
    row.insert("canvas_index".to_string(), canvas_index.to_string());
    row.insert("target_url".to_string(), target_url.to_string());
    row.insert("status".to_string(), status.to_string());
    row.insert("notes".to_string(), String::new());
    row
}

fn build_target(
    citation: &RowMap,
    rule: &IiifRule,
    manifest_info: &ManifestInfo,
    manifest: Option<&Value>,
) -> std::result::Result<RowMap, &'static str> {
    let status = if manifest_info.status.is_empty() {
        "provisional"
    } else {
        manifest_info.status.as_str()
    };
    let manifest_url = if manifest_info.manifest_url.is_empty() {
        rule.manifest_url.as_str()
    } else {
        manifest_info.manifest_url.as_str()
    };

    let extra = parse_extra_json(citation);
    let citation_key_value = if rule.citation_key_field.is_empty() {
        String::new()
    } else {
        citation_value(citation, &rule.citation_key_field, &extra)
    };
    if !rule.citation_key_field.is_empty() && citation_key_value.is_empty() {
        return Err("missing_citation_key_field");
    }

    match rule.target_rule.as_str() {
        "canvas_index" => {
            let Some(idx_value) = parse_strict_int(&citation_key_value) else {
                return Err("missing_or_non_numeric_index");
            };
            let base = rule.canvas_index_base.unwrap_or(0);
            let canvas_index = idx_value - base;
            if canvas_index < 0 {
                return Err("negative_canvas_index");
            }
            let mut canvas_id = String::new();
            if let Some(manifest) = manifest {
                let canvases = extract_canvas_ids(manifest);
                let Some(id) = canvases.get(canvas_index as usize) else {
                    return Err("canvas_index_out_of_range");
                };
                canvas_id = id.clone();
            }
            Ok(map_row(
                citation,
                manifest_url,
                status,
                &canvas_id,
                &get(citation, "page_label"),
                &canvas_index.to_string(),
                "",
            ))
        }
        "canvas_id_template" | "image_api_template" | "target_url_template" => {
            if rule.target_template.is_empty() {
                return Err("missing_target_template");
            }
            let mut context: BTreeMap<String, String> = citation.clone();
            context.insert("citation_key_value".to_string(), citation_key_value);
            context.insert(
                "citation_key_field".to_string(),
                rule.citation_key_field.clone(),
            );
            let rendered = render_template(&rule.target_template, citation, &extra, &context)
                .map_err(|_| "template_missing_fields")?;
            if rule.target_rule == "canvas_id_template" {
                Ok(map_row(
                    citation,
                    manifest_url,
                    status,
                    &rendered,
                    &get(citation, "page_label"),
                    "",
                    "",
                ))
            } else {
                Ok(map_row(citation, manifest_url, status, "", "", "", &rendered))
            }
        }
        _ => Err("unsupported_target_rule"),
    }
}

// === Pipeline ===

fn review_row(pairs: &[(&str, &str)]) -> RowMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn pair_key(row: &RowMap) -> (String, String) {
    (get(row, "edition_id"), get(row, "citation_ref"))
}

pub fn build_maps(
    citations_csv: &Path,
    manifests_csv: &Path,
    rules_csv: &Path,
    manifest_dir: &Path,
    out_dir: &Path,
) -> Result<()> {
    let (_, citations) = read_csv(citations_csv)?;
    let manifests = load_manifest_infos(manifests_csv)?;
    let rules = load_rules(rules_csv)?;

    let mut map_rows: Vec<RowMap> = Vec::new();
    let mut missing_iiif: Vec<RowMap> = Vec::new();
    let mut ambiguous: Vec<RowMap> = Vec::new();
    let default_info = ManifestInfo {
        status: "provisional".to_string(),
        ..Default::default()
    };

    for citation in &citations {
        let edition_id = get(citation, "edition_id");
        let citation_ref = get(citation, "citation_ref");
        let Some(rule) = rules.get(&edition_id) else {
            if NON_TEI_IN_SCOPE.contains(&edition_id.as_str()) {
                missing_iiif.push(review_row(&[
                    ("edition_id", &edition_id),
                    ("citation_ref", &citation_ref),
                    ("reason", "missing_iiif_rule"),
                    ("citation_key_field", ""),
                    ("citation_key_value", ""),
                    ("source_file", &get(citation, "source_file")),
                    ("source_row", &get(citation, "source_row")),
                ]));
            }
            continue;
        };

        let manifest_info = manifests.get(&edition_id).unwrap_or(&default_info);
        let manifest = load_manifest(&manifest_dir.join(format!("{edition_id}.json")))?;

        match build_target(citation, rule, manifest_info, manifest.as_ref()) {
            Ok(target) => map_rows.push(target),
            Err(reason) => missing_iiif.push(review_row(&[
                ("edition_id", &edition_id),
                ("citation_ref", &citation_ref),
                ("reason", reason),
                ("citation_key_field", &rule.citation_key_field),
                ("citation_key_value", &get(citation, &rule.citation_key_field)),
                ("source_file", &get(citation, "source_file")),
                ("source_row", &get(citation, "source_row")),
            ])),
        }
    }

    // A citation ref mapping to several distinct targets is ambiguous and
    // gets queued instead of written.
    let mut seen: BTreeMap<(String, String), Vec<RowMap>> = BTreeMap::new();
    for row in map_rows {
        seen.entry(pair_key(&row)).or_default().push(row);
    }
    let mut final_rows: Vec<RowMap> = Vec::new();
    for ((edition_id, citation_ref), items) in seen {
        if items.len() == 1 {
            final_rows.extend(items);
            continue;
        }
        let mut targets: Vec<String> = items
            .iter()
            .map(|i| {
                let canvas = get(i, "canvas_id");
                if canvas.is_empty() {
                    get(i, "target_url")
                } else {
                    canvas
                }
            })
            .collect();
        targets.sort();
        targets.dedup();
        ambiguous.push(review_row(&[
            ("edition_id", &edition_id),
            ("citation_ref", &citation_ref),
            ("reason", "multiple_targets"),
            ("targets", &targets.join(";")),
        ]));
    }
    final_rows.sort_by_key(pair_key);

    let mut missing_manifest: Vec<RowMap> = manifests
        .iter()
        .filter(|(_, info)| info.status == "provisional")
        .map(|(edition_id, info)| {
            review_row(&[
                ("edition_id", edition_id),
                ("reason", &info.why_provisional),
                ("manifest_url", &info.manifest_url),
                ("status", &info.status),
            ])
        })
        .collect();
    missing_manifest.sort_by_key(|r| get(r, "edition_id"));
    missing_iiif.sort_by_key(pair_key);
    ambiguous.sort_by_key(pair_key);

    info!(
        mapped = final_rows.len(),
        missing = missing_iiif.len(),
        ambiguous = ambiguous.len(),
        "built citation iiif map"
    );

    write_csv(&out_dir.join("citation_iiif_map.csv"), CITATION_IIIF_FIELDS, &final_rows)?;
    write_csv(
        &out_dir.join("needs_review_missing_manifest.csv"),
        MISSING_MANIFEST_FIELDS,
        &missing_manifest,
    )?;
    write_csv(
        &out_dir.join("needs_review_missing_iiif.csv"),
        MISSING_IIIF_FIELDS,
        &missing_iiif,
    )?;
    write_csv(
        &out_dir.join("needs_review_ambiguous_iiif.csv"),
        AMBIGUOUS_FIELDS,
        &ambiguous,
    )?;
    write_csv(&out_dir.join("needs_review_bad_rows.csv"), BAD_ROWS_FIELDS, &[])?;
    Ok(())
}

/// Build `citation_iiif_map.csv` and the needs-review queues from the
/// artifacts in `in_dir`, with cached manifests under `manifest_dir`.
pub fn run(in_dir: &Path, out_dir: &Path, manifest_dir: &Path) -> Result<()> {
    build_maps(
        &in_dir.join("citations.csv"),
        &in_dir.join("iiif_manifests.csv"),
        &in_dir.join("iiif_source_rules.csv"),
        manifest_dir,
        out_dir,
    )
}
