//! WhatsApp message templates — validation, positional placeholders, and the
//! review status reported back by the WhatsApp Business platform.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stratum_core::{StratumError, StratumResult, TenantId};
use tracing::info;
use uuid::Uuid;

pub const MAX_NAME_LEN: usize = 512;
pub const MAX_BODY_LEN: usize = 1024;
pub const MAX_HEADER_LEN: usize = 60;
pub const MAX_FOOTER_LEN: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppTemplate {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub language: String,
    pub category: TemplateCategory,
    pub header: Option<String>,
    pub body: String,
    pub footer: Option<String>,
    pub status: TemplateStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Marketing,
    Utility,
    Authentication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub language: String,
    pub category: TemplateCategory,
    #[serde(default)]
    pub header: Option<String>,
    pub body: String,
    #[serde(default)]
    pub footer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub language: Option<String>,
    pub category: Option<TemplateCategory>,
    pub header: Option<String>,
    pub body: Option<String>,
    pub footer: Option<String>,
}

/// Outcome of the platform's template review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateReview {
    pub status: TemplateStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

enum Segment<'a> {
    Text(&'a str),
    Placeholder(usize),
}

/// Split a body into literal text and `{{n}}` placeholders. Braces that do
/// not enclose a plain number are kept as text.
fn segments(body: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let parsed = after.find("}}").and_then(|close| {
            let inner = &after[..close];
            let is_number = !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit());
            if is_number {
                inner.parse::<usize>().ok().map(|n| (n, close))
            } else {
                None
            }
        });
        match parsed {
            Some((n, close)) => {
                if open > 0 {
                    out.push(Segment::Text(&rest[..open]));
                }
                out.push(Segment::Placeholder(n));
                rest = &after[close + 2..];
            }
            None => {
                out.push(Segment::Text(&rest[..open + 2]));
                rest = after;
            }
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Number of distinct placeholders in `body`, which must be exactly
/// `{{1}}..={{n}}`.
pub fn placeholder_count(body: &str) -> StratumResult<usize> {
    let mut seen: Vec<usize> = segments(body)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(n) => Some(n),
            Segment::Text(_) => None,
        })
        .collect();
    seen.sort_unstable();
    seen.dedup();

    let n = seen.len();
    if seen.iter().enumerate().any(|(i, p)| *p != i + 1) {
        let listed: Vec<String> = seen.iter().map(|p| format!("{{{{{}}}}}", p)).collect();
        return Err(StratumError::invalid(format!(
            "placeholders must be numbered {{{{1}}}} to {{{{{}}}}} without gaps, found {}",
            n,
            listed.join(", ")
        )));
    }
    Ok(n)
}

impl WhatsAppTemplate {
    pub fn placeholder_count(&self) -> usize {
        // The body was validated on write.
        placeholder_count(&self.body).unwrap_or(0)
    }

    /// Substitute every `{{i}}` with `params[i - 1]`. Exactly one parameter
    /// per placeholder is required.
    pub fn render(&self, params: &[String]) -> StratumResult<String> {
        let expected = self.placeholder_count();
        if params.len() != expected {
            return Err(StratumError::invalid(format!(
                "template {} expects {} parameter(s), got {}",
                self.name,
                expected,
                params.len()
            )));
        }
        let mut rendered = String::with_capacity(self.body.len());
        for segment in segments(&self.body) {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Placeholder(n) => rendered.push_str(&params[n - 1]),
            }
        }
        Ok(rendered)
    }

    pub fn is_approved(&self) -> bool {
        self.status == TemplateStatus::Approved
    }
}

fn validate_fields(
    name: &str,
    language: &str,
    header: Option<&str>,
    body: &str,
    footer: Option<&str>,
) -> StratumResult<()> {
    let mut problems = Vec::new();
    let valid_name = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if name.is_empty() || name.len() > MAX_NAME_LEN || !valid_name {
        problems.push(format!(
            "name must be 1 to {} lowercase letters, digits or underscores",
            MAX_NAME_LEN
        ));
    }
    if language.trim().is_empty() {
        problems.push("language must not be empty".to_string());
    }
    if body.trim().is_empty() {
        problems.push("body must not be empty".to_string());
    } else if body.chars().count() > MAX_BODY_LEN {
        problems.push(format!("body must not exceed {} characters", MAX_BODY_LEN));
    } else if let Err(StratumError::Validation(mut p)) = placeholder_count(body) {
        problems.append(&mut p);
    }
    if header.map_or(false, |h| h.chars().count() > MAX_HEADER_LEN) {
        problems.push(format!("header must not exceed {} characters", MAX_HEADER_LEN));
    }
    if footer.map_or(false, |f| f.chars().count() > MAX_FOOTER_LEN) {
        problems.push(format!("footer must not exceed {} characters", MAX_FOOTER_LEN));
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(StratumError::Validation(problems))
    }
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TemplateStore {
    templates: DashMap<Uuid, WhatsAppTemplate>,
    /// (tenant, name, language) -> template id
    names: DashMap<(TenantId, String, String), Uuid>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, tenant: &TenantId, req: NewTemplate) -> StratumResult<WhatsAppTemplate> {
        validate_fields(
            &req.name,
            &req.language,
            req.header.as_deref(),
            &req.body,
            req.footer.as_deref(),
        )?;
        let id = Uuid::new_v4();
        self.reserve_name(tenant, &req.name, &req.language, id)?;

        let now = Utc::now();
        let template = WhatsAppTemplate {
            id,
            tenant_id: tenant.clone(),
            name: req.name,
            language: req.language,
            category: req.category,
            header: req.header,
            body: req.body,
            footer: req.footer,
            status: TemplateStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.templates.insert(template.id, template.clone());
        info!(tenant = %tenant, template = %template.name, language = %template.language, "WhatsApp template created");
        Ok(template)
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<WhatsAppTemplate> {
        self.templates
            .get(&id)
            .filter(|t| &t.tenant_id == tenant)
            .map(|t| t.value().clone())
            .ok_or_else(|| StratumError::not_found("whatsapp template", id))
    }

    /// Templates for a tenant sorted by name then language.
    pub fn list(&self, tenant: &TenantId, status: Option<TemplateStatus>) -> Vec<WhatsAppTemplate> {
        let mut templates: Vec<WhatsAppTemplate> = self
            .templates
            .iter()
            .filter(|t| &t.tenant_id == tenant)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .map(|t| t.value().clone())
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.language.cmp(&b.language)));
        templates
    }

    /// Edit a template. Any edit sends it back to review.
    pub fn update(&self, tenant: &TenantId, id: Uuid, patch: TemplatePatch) -> StratumResult<WhatsAppTemplate> {
        let mut entry = self
            .templates
            .get_mut(&id)
            .filter(|t| &t.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("whatsapp template", id))?;
        let mut updated = entry.value().clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(language) = patch.language {
            updated.language = language;
        }
        if let Some(category) = patch.category {
            updated.category = category;
        }
        if let Some(header) = patch.header {
            updated.header = Some(header).filter(|h| !h.is_empty());
        }
        if let Some(body) = patch.body {
            updated.body = body;
        }
        if let Some(footer) = patch.footer {
            updated.footer = Some(footer).filter(|f| !f.is_empty());
        }
        validate_fields(
            &updated.name,
            &updated.language,
            updated.header.as_deref(),
            &updated.body,
            updated.footer.as_deref(),
        )?;
        if updated.name != entry.name || updated.language != entry.language {
            self.reserve_name(tenant, &updated.name, &updated.language, id)?;
            let old = (tenant.clone(), entry.name.clone(), entry.language.clone());
            self.names.remove_if(&old, |_, owner| *owner == id);
        }

        updated.status = TemplateStatus::Pending;
        updated.rejection_reason = None;
        updated.updated_at = Utc::now();
        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    /// Record the platform's review. Only pending templates can be reviewed.
    pub fn review(&self, tenant: &TenantId, id: Uuid, review: TemplateReview) -> StratumResult<WhatsAppTemplate> {
        let mut entry = self
            .templates
            .get_mut(&id)
            .filter(|t| &t.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("whatsapp template", id))?;

        if entry.status != TemplateStatus::Pending || review.status == TemplateStatus::Pending {
            return Err(StratumError::invalid_transition(entry.status, review.status));
        }
        entry.status = review.status;
        entry.rejection_reason = match review.status {
            TemplateStatus::Rejected => review.reason,
            _ => None,
        };
        entry.updated_at = Utc::now();
        info!(tenant = %tenant, template = %entry.name, status = ?entry.status, "WhatsApp template reviewed");
        Ok(entry.value().clone())
    }

    /// Claim `(name, language)` for template `id` within the tenant.
    fn reserve_name(&self, tenant: &TenantId, name: &str, language: &str, id: Uuid) -> StratumResult<()> {
        match self.names.entry((tenant.clone(), name.to_string(), language.to_string())) {
            Entry::Occupied(owner) if *owner.get() != id => Err(StratumError::Conflict(format!(
                "template {} already exists for language {}",
                name, language
            ))),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn new_template(name: &str, body: &str) -> NewTemplate {
        NewTemplate {
            name: name.to_string(),
            language: "en_US".to_string(),
            category: TemplateCategory::Marketing,
            header: None,
            body: body.to_string(),
            footer: Some("Reply STOP to opt out".to_string()),
        }
    }

    // 1. Placeholders -------------------------------------------------------

    #[test]
    fn test_placeholder_count() {
        assert_eq!(placeholder_count("Hi {{1}}, your code is {{2}}. Bye {{1}}").unwrap(), 2);
        assert_eq!(placeholder_count("No placeholders {here}").unwrap(), 0);
        assert_eq!(placeholder_count("Literal {{name}} is text").unwrap(), 0);
        assert!(placeholder_count("Gap {{1}} {{3}}").is_err());
        assert!(placeholder_count("Zero {{0}}").is_err());
    }

    #[test]
    fn test_render_substitutes_every_occurrence() {
        let store = TemplateStore::new();
        let t = store
            .create(&tenant(), new_template("order_ready", "Hi {{1}}! Order {{2}} is ready, {{1}}."))
            .unwrap();
        let rendered = t.render(&["Ana".to_string(), "#42".to_string()]).unwrap();
        assert_eq!(rendered, "Hi Ana! Order #42 is ready, Ana.");
    }

    #[test]
    fn test_render_does_not_expand_parameter_text() {
        let store = TemplateStore::new();
        let t = store
            .create(&tenant(), new_template("echo", "{{1}} and {{2}}"))
            .unwrap();
        let rendered = t.render(&["{{2}}".to_string(), "b".to_string()]).unwrap();
        assert_eq!(rendered, "{{2}} and b");
    }

    #[test]
    fn test_render_requires_exact_parameter_count() {
        let store = TemplateStore::new();
        let t = store.create(&tenant(), new_template("promo", "Save {{1}}")).unwrap();
        assert!(t.render(&[]).is_err());
        assert!(t.render(&["10%".to_string(), "extra".to_string()]).is_err());
    }

    // 2. Validation ---------------------------------------------------------

    #[test]
    fn test_name_and_body_rules() {
        let store = TemplateStore::new();
        assert!(store.create(&tenant(), new_template("Promo-1", "Hello")).is_err());
        assert!(store.create(&tenant(), new_template("", "Hello")).is_err());
        assert!(store
            .create(&tenant(), new_template("long_body", &"x".repeat(MAX_BODY_LEN + 1)))
            .is_err());
        assert!(store.create(&tenant(), new_template("fine_1", "Hello")).is_ok());
    }

    #[test]
    fn test_name_unique_per_language() {
        let store = TemplateStore::new();
        store.create(&tenant(), new_template("welcome", "Hi")).unwrap();
        let err = store.create(&tenant(), new_template("welcome", "Hello")).unwrap_err();
        assert!(matches!(err, StratumError::Conflict(_)));

        let mut spanish = new_template("welcome", "Hola");
        spanish.language = "es".to_string();
        assert!(store.create(&tenant(), spanish).is_ok());
        assert!(store.create(&TenantId::new("globex"), new_template("welcome", "Hi")).is_ok());
    }

    #[test]
    fn test_rename_releases_old_name() {
        let store = TemplateStore::new();
        let t = store.create(&tenant(), new_template("welcome", "Hi")).unwrap();
        let other = store.create(&tenant(), new_template("greeting", "Hey")).unwrap();

        let clash = TemplatePatch {
            name: Some("welcome".to_string()),
            ..TemplatePatch::default()
        };
        assert!(matches!(
            store.update(&tenant(), other.id, clash).unwrap_err(),
            StratumError::Conflict(_)
        ));

        let rename = TemplatePatch {
            name: Some("welcome_v2".to_string()),
            ..TemplatePatch::default()
        };
        store.update(&tenant(), t.id, rename).unwrap();
        assert!(store.create(&tenant(), new_template("welcome", "Hi again")).is_ok());
        assert!(store.create(&tenant(), new_template("welcome_v2", "Hi")).is_err());
    }

    #[test]
    fn test_concurrent_creates_admit_one() {
        use std::sync::Barrier;

        let store = TemplateStore::new();
        let threads = 8;
        let barrier = Barrier::new(threads);
        let created = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        store.create(&tenant(), new_template("launch", "Hi")).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(created, 1);
        assert_eq!(store.list(&tenant(), None).len(), 1);
    }

    // 3. Review -------------------------------------------------------------

    #[test]
    fn test_review_and_edit_resets_to_pending() {
        let store = TemplateStore::new();
        let t = store.create(&tenant(), new_template("promo", "Save {{1}}")).unwrap();
        assert_eq!(t.status, TemplateStatus::Pending);

        let approved = store
            .review(&tenant(), t.id, TemplateReview { status: TemplateStatus::Approved, reason: None })
            .unwrap();
        assert!(approved.is_approved());

        let err = store
            .review(&tenant(), t.id, TemplateReview { status: TemplateStatus::Rejected, reason: None })
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidTransition { .. }));

        let edited = store
            .update(
                &tenant(),
                t.id,
                TemplatePatch {
                    body: Some("Save {{1}} today".to_string()),
                    ..TemplatePatch::default()
                },
            )
            .unwrap();
        assert_eq!(edited.status, TemplateStatus::Pending);

        let rejected = store
            .review(
                &tenant(),
                t.id,
                TemplateReview {
                    status: TemplateStatus::Rejected,
                    reason: Some("promotional content in utility category".to_string()),
                },
            )
            .unwrap();
        assert_eq!(rejected.status, TemplateStatus::Rejected);
        assert!(rejected.rejection_reason.is_some());
    }
}
