/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: templates.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-10-14 10:08:45
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-10-17 17:51:12
 */

use crate::payload::{Attachment, EmailPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    /// Blob store key, `<owner>/<uuid>.<ext>`
    pub storage_path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<TemplateAttachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The editable part of a template.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub subject: String,
    pub html_body: String,
    #[serde(default)]
    pub attachments: Vec<TemplateAttachment>,
}

impl EmailTemplate {
    /// Attachments go out as remote references to their public URLs.
    pub fn to_payload(&self, to: &str, cc: Vec<String>, bcc: Vec<String>) -> EmailPayload {
        EmailPayload {
            to: to.to_string(),
            cc,
            bcc,
            subject: self.subject.clone(),
            html: self.html_body.clone(),
            attachments: self
                .attachments
                .iter()
                .map(|a| {
                    let attachment = Attachment::remote(a.filename.clone(), a.url.clone());
                    match &a.content_type {
                        Some(content_type) => attachment.with_content_type(content_type.clone()),
                        None => attachment,
                    }
                })
                .collect(),
        }
    }
}

#[allow(dead_code)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert(&self, template: EmailTemplate) -> anyhow::Result<EmailTemplate>;

    async fn update(&self, id: Uuid, template: EmailTemplate) -> anyhow::Result<EmailTemplate>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;

    /// Every template owned by `owner_id`, oldest first
    async fn select(&self, owner_id: &str) -> anyhow::Result<Vec<EmailTemplate>>;

    async fn single(&self, id: Uuid) -> anyhow::Result<EmailTemplate>;
}

#[allow(dead_code)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: Option<&str>) -> anyhow::Result<()>;

    async fn remove(&self, paths: &[String]) -> anyhow::Result<()>;

    fn public_url(&self, path: &str) -> String;
}

#[allow(dead_code)]
#[derive(Default)]
pub struct InMemoryTemplateStore {
    records: Mutex<HashMap<Uuid, EmailTemplate>>,
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn insert(&self, template: EmailTemplate) -> anyhow::Result<EmailTemplate> {
        let mut records = self.records.lock().await;
        if records.contains_key(&template.id) {
            anyhow::bail!("Template {} already exists", template.id);
        }
        records.insert(template.id, template.clone());
        Ok(template)
    }

    async fn update(&self, id: Uuid, template: EmailTemplate) -> anyhow::Result<EmailTemplate> {
        let mut records = self.records.lock().await;
        let slot = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Template {} not found", id))?;
        *slot = EmailTemplate { id, ..template };
        Ok(slot.clone())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("Template {} not found", id))
    }

    async fn select(&self, owner_id: &str) -> anyhow::Result<Vec<EmailTemplate>> {
        let records = self.records.lock().await;
        let mut owned: Vec<EmailTemplate> = records
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|t| t.created_at);
        Ok(owned)
    }

    async fn single(&self, id: Uuid) -> anyhow::Result<EmailTemplate> {
        self.records
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Template {} not found", id))
    }
}

#[allow(dead_code)]
pub struct InMemoryBlobStore {
    base_url: String,
    blobs: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
}

#[allow(dead_code)]
impl InMemoryBlobStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.lock().await.contains_key(path)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: Option<&str>) -> anyhow::Result<()> {
        let mut blobs = self.blobs.lock().await;
        if blobs.contains_key(path) {
            anyhow::bail!("Object {} already exists", path);
        }
        blobs.insert(path.to_string(), (bytes, content_type.map(str::to_string)));
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> anyhow::Result<()> {
        let mut blobs = self.blobs.lock().await;
        for path in paths {
            blobs.remove(path);
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// Template CRUD on top of a record store and a blob store.
#[allow(dead_code)]
pub struct TemplateService<S: TemplateStore, B: BlobStore> {
    store: S,
    blobs: B,
}

#[allow(dead_code)]
impl<S: TemplateStore, B: BlobStore> TemplateService<S, B> {
    pub fn new(store: S, blobs: B) -> Self {
        Self { store, blobs }
    }

    pub async fn create(&self, owner_id: &str, draft: TemplateDraft) -> anyhow::Result<EmailTemplate> {
        if draft.name.trim().is_empty() {
            anyhow::bail!("Template name must not be empty");
        }

        let now = Utc::now();
        let template = EmailTemplate {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: draft.name,
            subject: draft.subject,
            html_body: draft.html_body,
            attachments: draft.attachments,
            created_at: now,
            updated_at: now,
        };

        let template = self.store.insert(template).await?;
        info!("Created template {} for {}", template.id, owner_id);
        Ok(template)
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<EmailTemplate> {
        self.store.single(id).await
    }

    pub async fn list(&self, owner_id: &str) -> anyhow::Result<Vec<EmailTemplate>> {
        self.store.select(owner_id).await
    }

    pub async fn update(&self, id: Uuid, draft: TemplateDraft) -> anyhow::Result<EmailTemplate> {
        let current = self.store.single(id).await?;
        let template = EmailTemplate {
            name: draft.name,
            subject: draft.subject,
            html_body: draft.html_body,
            attachments: draft.attachments,
            updated_at: Utc::now(),
            ..current
        };
        self.store.update(id, template).await
    }

    /// Copies the record; attachments are shared with the original.
    pub async fn duplicate(&self, id: Uuid) -> anyhow::Result<EmailTemplate> {
        let source = self.store.single(id).await?;
        let now = Utc::now();
        let copy = EmailTemplate {
            id: Uuid::new_v4(),
            name: format!("{} (copy)", source.name),
            created_at: now,
            updated_at: now,
            ..source
        };

        let copy = self.store.insert(copy).await?;
        info!("Duplicated template {} as {}", id, copy.id);
        Ok(copy)
    }

    /// Removes the record, then best-effort removes blobs no other template uses.
    pub async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        let template = self.store.single(id).await?;
        self.store.delete(id).await?;

        let still_used: HashSet<String> = match self.store.select(&template.owner_id).await {
            Ok(others) => others
                .into_iter()
                .flat_map(|t| t.attachments.into_iter().map(|a| a.storage_path))
                .collect(),
            Err(e) => {
                warn!("Skipping attachment cleanup for template {}: {}", id, e);
                return Ok(());
            }
        };

        let orphaned: Vec<String> = template
            .attachments
            .into_iter()
            .map(|a| a.storage_path)
            .filter(|p| !still_used.contains(p))
            .collect();

        if !orphaned.is_empty() {
            if let Err(e) = self.blobs.remove(&orphaned).await {
                warn!("Failed to remove attachments of template {}: {}", id, e);
            }
        }

        info!("Deleted template {}", id);
        Ok(())
    }

    pub async fn upload_attachment(
        &self,
        owner_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> anyhow::Result<TemplateAttachment> {
        let path = storage_path(owner_id, filename);
        self.blobs
            .upload(&path, bytes, content_type)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to upload {}: {}", filename, e))?;

        Ok(TemplateAttachment {
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            url: self.blobs.public_url(&path),
            storage_path: path,
        })
    }

    pub async fn remove_attachment(&self, storage_path: &str) {
        if let Err(e) = self.blobs.remove(&[storage_path.to_string()]).await {
            warn!("Failed to remove attachment {}: {}", storage_path, e);
        }
    }
}

#[allow(dead_code)]
fn storage_path(owner_id: &str, filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{}/{}.{}", owner_id, Uuid::new_v4(), ext),
        _ => format!("{}/{}", owner_id, Uuid::new_v4()),
    }
}
