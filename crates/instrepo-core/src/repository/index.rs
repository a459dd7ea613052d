// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document-index instance repository backed by tantivy.
//!
//! Each instance is one self-contained document. The flattened [`FieldSet`]
//! produced by [`codec::encode`] is stored under its own field names in a
//! JSON object field. The fields queries need (`inst.id`, `inst.status`,
//! `inst.start_time` and the `__present__` marker) are also schema fields
//! of the same name. Documents round-trip the complete workflow snapshot.
//!
//! Tantivy allows a single writer per index. Every mutation opens its own
//! writer under the backend lock, commits, and closes it before the lock is
//! released, so no writer outlives a call and readers never observe a
//! half-applied update.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, OwnedValue, STORED, STRING, Schema, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::codec::{self, FieldSet, INST_ID, INST_START_TIME, INST_STATUS, PRESENT_FIELD, PRESENT_VALUE};
use crate::error::{CodecError, Result, StoreError};
use crate::model::WorkflowInstance;
use crate::pagination::{compare_instances, compare_start_then_id, page_offset};

use super::{InstanceRepository, effective_page_size};

const WRITER_MEMORY_BYTES: usize = 20_000_000;

/// JSON object holding every encoded field by name.
const FIELD_SET: &str = "fields";

#[derive(Debug, Clone, Copy)]
struct IndexFields {
    id: Field,
    status: Field,
    start: Field,
    present: Field,
    field_set: Field,
}

impl IndexFields {
    /// Schema fields filled from the encoded field of the same name.
    fn term_fields(&self) -> [(&'static str, Field); 4] {
        [
            (INST_ID, self.id),
            (INST_STATUS, self.status),
            (INST_START_TIME, self.start),
            (PRESENT_FIELD, self.present),
        ]
    }
}

fn build_schema() -> (Schema, IndexFields) {
    let mut builder = Schema::builder();
    let fields = IndexFields {
        id: builder.add_text_field(INST_ID, STRING | STORED),
        status: builder.add_text_field(INST_STATUS, STRING),
        start: builder.add_text_field(INST_START_TIME, STORED),
        present: builder.add_text_field(PRESENT_FIELD, STRING),
        field_set: builder.add_json_field(FIELD_SET, STORED | STRING),
    };
    (builder.build(), fields)
}

struct IndexInner {
    index: Index,
    reader: IndexReader,
    write_lock: Mutex<()>,
    fields: IndexFields,
}

/// Tantivy-backed implementation of [`InstanceRepository`].
#[derive(Clone)]
pub struct IndexRepository {
    inner: Arc<IndexInner>,
    page_size: usize,
}

impl IndexRepository {
    /// Open the index in `path`, creating the directory and an empty index
    /// when needed.
    pub fn open(path: impl AsRef<Path>, page_size: i64) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::repository("open", format!("Failed to create directory {:?}: {}", path, e))
        })?;

        let directory = MmapDirectory::open(path)
            .map_err(|e| StoreError::repository("open", format!("Failed to open index at {:?}: {}", path, e)))?;
        let (schema, fields) = build_schema();
        let index = Index::open_or_create(directory, schema)?;
        Self::from_index(index, fields, page_size)
    }

    /// Create a volatile index held in RAM.
    pub fn in_ram(page_size: i64) -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields, page_size)
    }

    fn from_index(index: Index, fields: IndexFields, page_size: i64) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            inner: Arc::new(IndexInner {
                index,
                reader,
                write_lock: Mutex::new(()),
                fields,
            }),
            page_size: effective_page_size(page_size),
        })
    }

    /// Run `f` on the blocking pool; tantivy I/O is synchronous.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&IndexInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl IndexInner {
    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    fn id_query(&self, id: &str) -> TermQuery {
        TermQuery::new(self.id_term(id), IndexRecordOption::Basic)
    }

    /// Marker clause, plus a status clause when filtering.
    fn filter_query(&self, status: Option<&str>) -> BooleanQuery {
        let marker = Term::from_field_text(self.fields.present, PRESENT_VALUE);
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(
            Occur::Must,
            Box::new(TermQuery::new(marker, IndexRecordOption::Basic)),
        )];
        if let Some(status) = status {
            let term = Term::from_field_text(self.fields.status, status);
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }
        BooleanQuery::new(clauses)
    }

    fn count(&self, query: &dyn Query) -> Result<usize> {
        Ok(self.reader.searcher().search(query, &Count)?)
    }

    /// Every document matching `query`, in no particular order.
    fn matching_docs(&self, query: &dyn Query) -> Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let count = searcher.search(query, &Count)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let hits = searcher.search(query, &TopDocs::with_limit(count))?;
        hits.into_iter()
            .map(|(_, address)| searcher.doc::<TantivyDocument>(address).map_err(StoreError::from))
            .collect()
    }

    fn stored_str<'a>(&self, doc: &'a TantivyDocument, field: Field) -> Option<&'a str> {
        doc.get_first(field).and_then(|value| value.as_str())
    }

    fn decode_doc(&self, doc: &TantivyDocument) -> Result<WorkflowInstance> {
        let invalid = |value: &OwnedValue| CodecError::InvalidValue {
            field: FIELD_SET.to_string(),
            value: format!("{:?}", value),
        };

        let object = match doc.get_first(self.fields.field_set) {
            Some(OwnedValue::Object(object)) => object,
            Some(other) => return Err(invalid(other).into()),
            None => return Err(CodecError::MissingField(FIELD_SET.to_string()).into()),
        };

        let mut fields = FieldSet::new();
        for (name, value) in object {
            let values = match value {
                OwnedValue::Array(values) => values.as_slice(),
                single => std::slice::from_ref(single),
            };
            for value in values {
                match value {
                    OwnedValue::Str(text) => fields.push(name.as_str(), text.as_str()),
                    other => return Err(invalid(other).into()),
                }
            }
        }
        Ok(codec::decode(&fields)?)
    }

    fn to_document(&self, instance: &WorkflowInstance) -> Result<TantivyDocument> {
        let fields = codec::encode(instance)?;

        let mut doc = TantivyDocument::default();
        for (name, field) in self.fields.term_fields() {
            for value in fields.get_all(name) {
                doc.add_text(field, value);
            }
        }

        let object: BTreeMap<String, OwnedValue> = fields
            .names()
            .map(|name| {
                let values = fields
                    .get_all(name)
                    .iter()
                    .map(|value| OwnedValue::Str(value.clone()))
                    .collect();
                (name.to_string(), OwnedValue::Array(values))
            })
            .collect();
        doc.add_object(self.fields.field_set, object);
        Ok(doc)
    }

    /// Open a writer, apply `f` and commit. On failure the pending
    /// operations are rolled back before the error is returned. The writer is
    /// closed before the lock is released.
    fn write<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Self, &mut IndexWriter<TantivyDocument>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.blocking_lock();
        let mut writer: IndexWriter<TantivyDocument> = self
            .index
            .writer_with_num_threads(1, WRITER_MEMORY_BYTES)
            .map_err(|e| StoreError::repository(operation, e))?;

        let result = f(self, &mut writer).and_then(|value| {
            writer.commit()?;
            Ok(value)
        });

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if let Err(rollback) = writer.rollback() {
                    error!(operation, error = %rollback, "Unable to roll back index writer");
                    return Err(StoreError::repository(
                        operation,
                        format!("{}; rollback failed: {}", err, rollback),
                    ));
                }
                return Err(err);
            }
        };

        // Committed; a failed merge only leaves extra segments behind.
        if let Err(e) = writer.wait_merging_threads() {
            warn!(operation, error = %e, "Index merge did not complete");
        }
        self.reader
            .reload()
            .map_err(|e| StoreError::repository(operation, e))?;
        Ok(value)
    }

    fn get(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let query = self.id_query(id);
        let docs = self.matching_docs(&query)?;
        match docs.len() {
            0 => Ok(None),
            1 => self.decode_doc(&docs[0]).map(Some),
            count => Err(CodecError::DuplicateId {
                id: id.to_string(),
                count,
            }
            .into()),
        }
    }

    fn list(&self, status: Option<&str>) -> Result<Vec<WorkflowInstance>> {
        let query = self.filter_query(status);
        let mut instances = self
            .matching_docs(&query)?
            .iter()
            .map(|doc| self.decode_doc(doc))
            .collect::<Result<Vec<_>>>()?;
        instances.sort_by(compare_instances);
        Ok(instances)
    }

    fn page_ids(&self, page_num: usize, page_size: usize, status: Option<&str>) -> Result<Vec<String>> {
        let query = self.filter_query(status);
        let mut keys = Vec::new();
        for doc in self.matching_docs(&query)? {
            let id = self
                .stored_str(&doc, self.fields.id)
                .ok_or_else(|| CodecError::MissingField(INST_ID.to_string()))?;
            let start = self.stored_str(&doc, self.fields.start).map(str::to_string);
            keys.push((start, id.to_string()));
        }
        keys.sort_by(|(a_start, a_id), (b_start, b_id)| {
            compare_start_then_id(a_start.as_deref(), a_id, b_start.as_deref(), b_id)
        });

        let offset = page_offset(page_num, page_size, keys.len());
        Ok(keys
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(|(_, id)| id)
            .collect())
    }
}

#[async_trait::async_trait]
impl InstanceRepository for IndexRepository {
    async fn add(&self, instance: &WorkflowInstance) -> Result<String> {
        let mut stored = instance.clone();
        stored.id = Uuid::now_v7().to_string();

        let id = self
            .blocking(move |inner| {
                let doc = inner.to_document(&stored)?;
                inner.write("add", |_, writer| {
                    writer.add_document(doc)?;
                    Ok(())
                })?;
                Ok(stored.id)
            })
            .await?;

        debug!(instance_id = %id, status = %instance.status, "Instance added");
        Ok(id)
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<()> {
        let instance = instance.clone();
        let id = instance.id.clone();

        let updated = self
            .blocking(move |inner| {
                let doc = inner.to_document(&instance)?;
                inner.write("update", |inner, writer| {
                    let existing = inner.count(&inner.id_query(&instance.id))?;
                    if existing == 0 {
                        return Ok(false);
                    }
                    writer.delete_term(inner.id_term(&instance.id));
                    writer.add_document(doc)?;
                    Ok(true)
                })
            })
            .await?;

        if updated {
            debug!(instance_id = %id, "Instance updated");
        } else {
            warn!(instance_id = %id, "Attempt to update an instance that is not tracked");
        }
        Ok(())
    }

    async fn remove(&self, instance_id: &str) -> Result<()> {
        let id = instance_id.to_string();
        self.blocking(move |inner| {
            inner.write("remove", |inner, writer| {
                writer.delete_term(inner.id_term(&id));
                Ok(())
            })
        })
        .await?;

        debug!(instance_id, "Instance removed");
        Ok(())
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        let id = instance_id.to_string();
        self.blocking(move |inner| inner.get(&id)).await
    }

    async fn get_all(&self) -> Result<Vec<WorkflowInstance>> {
        self.blocking(|inner| inner.list(None)).await
    }

    async fn get_all_by_status(&self, status: &str) -> Result<Vec<WorkflowInstance>> {
        let status = status.to_string();
        self.blocking(move |inner| inner.list(Some(&status))).await
    }

    async fn count(&self) -> Result<usize> {
        self.blocking(|inner| inner.count(&inner.filter_query(None))).await
    }

    async fn count_by_status(&self, status: &str) -> Result<usize> {
        let status = status.to_string();
        self.blocking(move |inner| inner.count(&inner.filter_query(Some(&status))))
            .await
    }

    async fn ids_for_page(&self, page_num: usize, status: Option<&str>) -> Result<Vec<String>> {
        let status = status.map(str::to_string);
        let page_size = self.page_size;
        self.blocking(move |inner| inner.page_ids(page_num, page_size, status.as_deref()))
            .await
    }

    async fn clear_all(&self) -> Result<bool> {
        self.blocking(|inner| {
            inner.write("clear_all", |inner, writer| {
                writer.delete_term(Term::from_field_text(inner.fields.present, PRESENT_VALUE));
                Ok(())
            })
        })
        .await?;

        debug!("All instances cleared");
        Ok(true)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
