//! Group-wise batch orchestration over the resilient invocation layer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use futures_util::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::constants::{BATCH_EXTRACTION_PROMPT, EXTRACTION_PROMPT};
use crate::pipeline::{ExtractionRequest, InvoiceRecord, reconcile};

use super::context::PromptPart;
use super::extract::{ExtractError, ExtractorService};

/// Error string stamped on records synthesized by the completeness backstop.
pub const MISSED_RECORD_ERROR: &str = "missed during processing";

#[derive(Debug, Clone, Builder)]
pub struct BatchOptions {
    /// Documents per group.
    #[builder(default = 5)]
    pub batch_size: usize,
    /// Pause between consecutive groups.
    #[builder(default = Duration::from_millis(2_000))]
    pub group_pause: Duration,
    /// Concurrent individual calls within one group.
    #[builder(default = 4)]
    pub concurrency: usize,
}

/// Walks the request list in groups, batching images into combined calls
/// where possible and guaranteeing one output record per input document.
pub struct BatchOrchestrator {
    extractor: Arc<ExtractorService>,
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(extractor: Arc<ExtractorService>, options: BatchOptions) -> Self {
        Self { extractor, options }
    }

    /// Processes every request and returns exactly one record per request,
    /// in input order. Per-document failures become error records; this
    /// method itself never fails.
    pub async fn process_all(&self, requests: &[ExtractionRequest]) -> Vec<InvoiceRecord> {
        if requests.is_empty() {
            return Vec::new();
        }

        let batch_size = self.options.batch_size.max(1);
        let group_count = requests.len().div_ceil(batch_size);
        let mut produced: BTreeMap<String, InvoiceRecord> = BTreeMap::new();

        for (index, group) in requests.chunks(batch_size).enumerate() {
            info!(
                group = index + 1,
                groups = group_count,
                documents = group.len(),
                "processing document group"
            );
            for record in self.process_group(group).await {
                produced.insert(record.identifier.clone(), record);
            }
            if index + 1 < group_count {
                sleep(self.options.group_pause).await;
            }
        }

        assemble_records(requests, &produced)
    }

    async fn process_group(&self, group: &[ExtractionRequest]) -> Vec<InvoiceRecord> {
        let (images, pdfs): (Vec<&ExtractionRequest>, Vec<&ExtractionRequest>) =
            group.iter().partition(|request| request.kind.is_image());

        let mut records = Vec::with_capacity(group.len());
        // PDFs always travel one per call.
        let mut individual: Vec<&ExtractionRequest> = pdfs;

        if images.len() > 1 {
            match self.combined_image_call(&images).await {
                Ok(batch_records) => records.extend(batch_records),
                Err(error) => {
                    warn!(
                        images = images.len(),
                        %error,
                        "combined image call failed, falling back to individual calls"
                    );
                    individual.extend(images.iter().copied());
                }
            }
        } else {
            individual.extend(images.iter().copied());
        }

        let concurrency = self.options.concurrency.max(1);
        let individual_records: Vec<InvoiceRecord> = stream::iter(
            individual
                .into_iter()
                .map(|request| self.process_single(request)),
        )
        .buffer_unordered(concurrency)
        .collect()
        .await;
        records.extend(individual_records);
        records
    }

    /// Sends every image of the group in one call and maps the response
    /// array back onto the identifiers positionally.
    async fn combined_image_call(
        &self,
        images: &[&ExtractionRequest],
    ) -> Result<Vec<InvoiceRecord>, ExtractError> {
        let parts: Vec<PromptPart> = images.iter().map(|request| document_part(request)).collect();
        let identifiers: Vec<String> = images.iter().map(|request| request.id.clone()).collect();
        let text = self.extractor.invoke(BATCH_EXTRACTION_PROMPT, &parts).await?;
        Ok(reconcile(&text, &identifiers))
    }

    async fn process_single(&self, request: &ExtractionRequest) -> InvoiceRecord {
        let part = document_part(request);
        match self
            .extractor
            .invoke(EXTRACTION_PROMPT, std::slice::from_ref(&part))
            .await
        {
            Ok(text) => reconcile(&text, std::slice::from_ref(&request.id))
                .into_iter()
                .next()
                .unwrap_or_else(|| InvoiceRecord::failed(request.id.clone(), MISSED_RECORD_ERROR)),
            Err(error) => {
                warn!(identifier = %request.id, %error, "document extraction failed");
                InvoiceRecord::failed(request.id.clone(), error.to_string())
            }
        }
    }
}

fn document_part(request: &ExtractionRequest) -> PromptPart {
    PromptPart::Document {
        mime_type: request.kind.mime_type(),
        bytes: Arc::clone(&request.bytes),
    }
}

/// Final completeness pass: one record per request in input order, with a
/// synthesized error record for any identifier that fell through.
fn assemble_records(
    requests: &[ExtractionRequest],
    produced: &BTreeMap<String, InvoiceRecord>,
) -> Vec<InvoiceRecord> {
    requests
        .iter()
        .map(|request| match produced.get(&request.id) {
            Some(record) => record.clone(),
            None => {
                warn!(identifier = %request.id, "no record produced, synthesizing error record");
                InvoiceRecord::failed(request.id.clone(), MISSED_RECORD_ERROR)
            }
        })
        .collect()
}
