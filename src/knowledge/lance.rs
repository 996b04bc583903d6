//! LanceDB Vector Store - 코퍼스별 임베딩 저장 및 코사인 검색
//!
//! 청크 텍스트는 SQLite에 두고, 여기에는 chunk_id와 필터용 컬럼만 둡니다.
//! 로컬 디렉토리(`vectors.lance`)와 원격 URI(s3:// 등) 모두 같은 코드로 접속합니다.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::chunk::{quote_literal, Corpus, ScopeFilter};
use crate::error::RagError;

/// 이 행 수 미만이면 ANN 인덱스를 만들지 않음 (PQ 학습 데이터 부족)
const MIN_ROWS_FOR_INDEX: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// 벡터 행 (chunk_id로 SQLite 행과 연결)
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub chunk_id: i64,
    pub source_key: String,
    pub device_type: Option<String>,
    pub device_model_used: bool,
    pub embedding: Vec<f32>,
}

/// 벡터 검색 결과
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk_id: i64,
    /// 코사인 유사도 (1 - cosine distance)
    pub similarity: f64,
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소
pub struct LanceVectorStore {
    db: Connection,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 접속
    ///
    /// # Arguments
    /// * `uri` - 로컬 경로 또는 원격 URI
    /// * `dimension` - 임베딩 차원
    pub async fn connect(uri: &str, dimension: usize) -> Result<Self> {
        if !uri.contains("://") {
            tokio::fs::create_dir_all(uri)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("LanceDB {}: {}", uri, e)))?;

        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 벡터 테이블 스키마
    fn create_schema(dimension: usize) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("chunk_id", DataType::Int64, false),
            Field::new("source_key", DataType::Utf8, false),
            Field::new("device_type", DataType::Utf8, true),
            Field::new("device_model_used", DataType::Boolean, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ]))
    }

    /// 행들을 Arrow RecordBatch로 변환
    fn rows_to_batch(&self, rows: &[VectorRow]) -> Result<RecordBatch> {
        if rows.is_empty() {
            anyhow::bail!("Cannot create batch from empty rows");
        }

        for row in rows {
            if row.embedding.len() != self.dimension {
                return Err(RagError::dimension_mismatch(
                    &row.source_key,
                    self.dimension,
                    row.embedding.len(),
                )
                .into());
            }
        }

        let chunk_ids: Vec<i64> = rows.iter().map(|r| r.chunk_id).collect();
        let source_keys: Vec<&str> = rows.iter().map(|r| r.source_key.as_str()).collect();
        let device_types: Vec<Option<&str>> =
            rows.iter().map(|r| r.device_type.as_deref()).collect();
        let model_used: Vec<bool> = rows.iter().map(|r| r.device_model_used).collect();

        let embeddings_flat: Vec<f32> = rows
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Self::create_schema(self.dimension),
            vec![
                Arc::new(Int64Array::from(chunk_ids)),
                Arc::new(StringArray::from(source_keys)),
                Arc::new(StringArray::from(device_types)),
                Arc::new(BooleanArray::from(model_used)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self, corpus: Corpus) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::StoreUnavailable(format!("LanceDB table listing: {}", e)))?;
        Ok(names.iter().any(|n| n == corpus.vector_table_name()))
    }

    async fn open_table(&self, corpus: Corpus) -> Result<Option<Table>> {
        if !self.table_exists(corpus).await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(corpus.vector_table_name())
            .execute()
            .await
            .with_context(|| format!("Failed to open {}", corpus.vector_table_name()))?;
        Ok(Some(table))
    }

    /// 빈 테이블 생성 (이미 있으면 무시)
    pub async fn ensure_table(&self, corpus: Corpus) -> Result<()> {
        if self.table_exists(corpus).await? {
            return Ok(());
        }

        self.db
            .create_empty_table(corpus.vector_table_name(), Self::create_schema(self.dimension))
            .execute()
            .await
            .with_context(|| format!("Failed to create {}", corpus.vector_table_name()))?;

        tracing::debug!(
            "Created vector table {} (dim={})",
            corpus.vector_table_name(),
            self.dimension
        );
        Ok(())
    }

    /// 저장된 embedding 컬럼 차원 (테이블이 없으면 None)
    pub async fn stored_dimension(&self, corpus: Corpus) -> Result<Option<usize>> {
        let Some(table) = self.open_table(corpus).await? else {
            return Ok(None);
        };

        let schema = table.schema().await.context("Failed to read vector schema")?;
        let field = schema
            .field_with_name("embedding")
            .context("Missing embedding column")?;

        match field.data_type() {
            DataType::FixedSizeList(_, size) => Ok(Some(*size as usize)),
            other => anyhow::bail!("Unexpected embedding column type: {:?}", other),
        }
    }

    /// 벡터 추가
    pub async fn add(&self, corpus: Corpus, rows: &[VectorRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let batch = self.rows_to_batch(rows)?;
        let schema = batch.schema();

        self.ensure_table(corpus).await?;
        let table = self
            .open_table(corpus)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Vector table {} disappeared", corpus))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(batches)
            .execute()
            .await
            .context("Failed to add vectors to table")?;

        Ok(rows.len())
    }

    /// 코사인 거리 기반 최근접 검색
    pub async fn search(
        &self,
        corpus: Corpus,
        query_embedding: &[f32],
        limit: usize,
        scope: &ScopeFilter,
    ) -> Result<Vec<VectorMatch>> {
        if query_embedding.len() != self.dimension {
            return Err(RagError::dimension_mismatch(
                "query",
                self.dimension,
                query_embedding.len(),
            )
            .into());
        }
        if limit == 0 {
            return Ok(vec![]);
        }

        let Some(table) = self.open_table(corpus).await? else {
            return Ok(vec![]);
        };

        let mut query = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .column("embedding")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(filter) = scope_to_filter(scope) {
            query = query.only_if(filter);
        }

        let results = query
            .execute()
            .await
            .context("Failed to execute vector search")?;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut matches = Vec::new();
        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                matches.push(VectorMatch {
                    chunk_id: chunk_ids.value(i),
                    similarity: 1.0 - distances.value(i) as f64,
                });
            }
        }

        // 배치 경계를 넘어서도 유사도 내림차순 유지
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });

        Ok(matches)
    }

    /// source_key의 벡터 삭제
    pub async fn delete_by_source_key(&self, corpus: Corpus, source_key: &str) -> Result<usize> {
        let Some(table) = self.open_table(corpus).await? else {
            return Ok(0);
        };

        let filter = format!("source_key = {}", quote_literal(source_key));
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count vectors")?;
        if before == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        Ok(before)
    }

    /// 벡터 수
    pub async fn count(&self, corpus: Corpus) -> Result<usize> {
        let Some(table) = self.open_table(corpus).await? else {
            return Ok(0);
        };

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    /// IVF-PQ 코사인 인덱스 생성
    ///
    /// 행 수가 부족하면 건너뛰고 false를 반환합니다 (브루트포스 검색 유지).
    pub async fn create_index(&self, corpus: Corpus) -> Result<bool> {
        let Some(table) = self.open_table(corpus).await? else {
            return Ok(false);
        };

        let rows = table.count_rows(None).await?;
        if rows < MIN_ROWS_FOR_INDEX {
            tracing::info!(
                "Skipping ANN index for {} ({} rows < {})",
                corpus.vector_table_name(),
                rows,
                MIN_ROWS_FOR_INDEX
            );
            return Ok(false);
        }

        table
            .create_index(
                &["embedding"],
                Index::IvfPq(IvfPqIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .replace(true)
            .execute()
            .await
            .with_context(|| format!("Failed to build index on {}", corpus.vector_table_name()))?;

        tracing::info!("Built IVF-PQ index on {} ({} rows)", corpus.vector_table_name(), rows);
        Ok(true)
    }
}

/// ScopeFilter를 LanceDB SQL 필터로 변환
fn scope_to_filter(scope: &ScopeFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(ref device_type) = scope.device_type {
        clauses.push(format!("device_type = {}", quote_literal(device_type)));
    }
    if scope.exact_model_only {
        clauses.push("device_model_used = true".to_string());
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

// ============================================================================
// Tests
// ============================================================================
