use chrono::Datelike;
use mediaforge_contracts::{
    AssetMetadata, AssetStatus, BusinessContext, Dimensions, GenerationRequest, PersistedAsset,
    UPLOAD_PROVENANCE,
};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const MAX_ALT_TEXT_CHARS: usize = 125;
const MAX_SLUG_CHARS: usize = 48;

/// Everything known about an asset once its final URL is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDraft {
    pub url: String,
    pub filename: String,
    pub alt_text: String,
    pub generated_by: String,
    pub model: Option<String>,
    pub dimensions: Dimensions,
    pub warnings: Vec<String>,
}

pub fn build_asset(draft: AssetDraft, context: &BusinessContext) -> PersistedAsset {
    let author = context.author_or_business();
    let rights = rights_notice(&author, chrono::Utc::now().year());
    let structured_data = image_object(&draft, context, &author, &rights);
    let status = if draft.generated_by == UPLOAD_PROVENANCE {
        AssetStatus::Uploaded
    } else {
        AssetStatus::Generated
    };
    PersistedAsset {
        status,
        url: draft.url,
        metadata: Some(AssetMetadata {
            filename: draft.filename,
            alt_text: draft.alt_text,
            author,
            rights,
            structured_data,
            generated_by: draft.generated_by,
            model: draft.model,
            width: draft.dimensions.width,
            height: draft.dimensions.height,
            created_at: now_utc_iso(),
        }),
        warnings: draft.warnings,
        error: None,
    }
}

/// `{slug}-{label}-{hash}.{ext}`; the label is the asset class or `upload`
/// and the hash is over the asset content.
pub fn asset_filename(description: &str, label: &str, content: &[u8], extension: &str) -> String {
    let slug = slugify(description);
    let hash = short_hash(content);
    let stem = if slug.is_empty() {
        format!("{label}-{hash}")
    } else {
        format!("{slug}-{label}-{hash}")
    };
    format!("{stem}.{}", extension.trim_start_matches('.'))
}

/// Overlay text reads better than the prompt when present.
pub fn alt_text_for(request: &GenerationRequest) -> String {
    let source = request
        .text_overlay
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(request.description.trim());
    clamp_alt_text(source)
}

pub fn clamp_alt_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ALT_TEXT_CHARS {
        return collapsed;
    }
    let clipped: String = collapsed.chars().take(MAX_ALT_TEXT_CHARS - 1).collect();
    let clipped = match clipped.rfind(' ') {
        Some(idx) if idx > MAX_ALT_TEXT_CHARS / 2 => clipped[..idx].to_string(),
        _ => clipped,
    };
    format!("{}…", clipped.trim_end())
}

fn slugify(raw: &str) -> String {
    let mut slug = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_CHARS {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}

fn short_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..4])
}

fn rights_notice(owner: &str, year: i32) -> String {
    if owner.is_empty() {
        return format!("© {year}");
    }
    format!("© {year} {owner}")
}

fn image_object(draft: &AssetDraft, context: &BusinessContext, author: &str, rights: &str) -> Value {
    let mut object = Map::new();
    object.insert("@context".to_string(), json!("https://schema.org"));
    object.insert("@type".to_string(), json!("ImageObject"));
    // A data URL is not repeated here; `ephemeral` marks the null contentUrl.
    if draft.url.starts_with("data:") {
        object.insert("contentUrl".to_string(), Value::Null);
        object.insert("ephemeral".to_string(), json!(true));
    } else {
        object.insert("contentUrl".to_string(), json!(draft.url));
    }
    object.insert("name".to_string(), json!(draft.filename));
    object.insert("caption".to_string(), json!(draft.alt_text));
    object.insert("width".to_string(), json!(draft.dimensions.width));
    object.insert("height".to_string(), json!(draft.dimensions.height));
    object.insert("copyrightNotice".to_string(), json!(rights));
    if !author.is_empty() {
        object.insert("creditText".to_string(), json!(author));
        object.insert(
            "creator".to_string(),
            json!({ "@type": "Organization", "name": author }),
        );
    }
    if let Some(license) = context
        .license_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        object.insert("license".to_string(), json!(license));
    }
    Value::Object(object)
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
