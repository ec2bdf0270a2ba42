//! rs-ID → allele/coordinate lookup against myvariant.info.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api_handler::APIHandler;
use crate::config::{AnnotationConfig, Assembly};

/// Alleles and position of one rs-ID on the requested assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAllele {
    pub chrom: String,
    pub pos: i64,
    pub ref_allele: String,
    pub alt_allele: String,
}

pub type AlleleMap = HashMap<String, ResolvedAllele>;

/// Anything able to look up one batch of rs-IDs. IDs it cannot resolve are
/// simply missing from the returned map.
pub trait AlleleResolver {
    fn fetch_batch(&self, rs_ids: &[String], assembly: Assembly) -> Result<AlleleMap>;
}

pub struct MyVariantClient {
    api: APIHandler,
}

impl MyVariantClient {
    pub fn new(config: &AnnotationConfig) -> Result<Self> {
        Ok(Self {
            api: APIHandler::new(&config.base_url, config.timeout())?,
        })
    }
}

impl AlleleResolver for MyVariantClient {
    fn fetch_batch(&self, rs_ids: &[String], assembly: Assembly) -> Result<AlleleMap> {
        let ids = rs_ids.join(",");
        let fields = format!("dbsnp.ref,dbsnp.alt,chrom,dbsnp.{}.start", assembly);
        let body = self.api.post_form(
            "/variant",
            &[
                ("ids", ids.as_str()),
                ("assembly", assembly.as_str()),
                ("fields", fields.as_str()),
            ],
        )?;
        parse_variant_response(&body, assembly)
    }
}

/// Keeps only hits with single-string alleles, a chromosome and an integer
/// start on `assembly`. A later hit for the same query replaces an earlier one.
pub fn parse_variant_response(body: &Value, assembly: Assembly) -> Result<AlleleMap> {
    let items = body
        .as_array()
        .ok_or_else(|| anyhow!("expected a JSON array from the annotation service"))?;

    let mut results = AlleleMap::new();
    for item in items {
        let Some(rs_id) = item.get("query").and_then(Value::as_str) else {
            continue;
        };
        let Some(dbsnp) = item.get("dbsnp") else {
            debug!("{} not found", rs_id);
            continue;
        };
        let ref_allele = dbsnp.get("ref").and_then(Value::as_str);
        let alt_allele = dbsnp.get("alt").and_then(Value::as_str);
        let chrom = item.get("chrom").and_then(Value::as_str);
        let pos = dbsnp
            .get(assembly.as_str())
            .and_then(|coords| coords.get("start"))
            .and_then(Value::as_i64);

        match (ref_allele, alt_allele, chrom, pos) {
            (Some(r), Some(a), Some(c), Some(p)) if !r.is_empty() && !a.is_empty() => {
                results.insert(
                    rs_id.to_string(),
                    ResolvedAllele {
                        chrom: c.to_string(),
                        pos: p,
                        ref_allele: r.to_string(),
                        alt_allele: a.to_string(),
                    },
                );
            }
            _ => debug!("{} has no single-allele record on {}", rs_id, assembly),
        }
    }
    Ok(results)
}

/// Outcome of a full resolution run.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub alleles: AlleleMap,
    pub requested: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

impl ResolutionReport {
    pub fn resolved(&self) -> usize {
        self.alleles.len()
    }

    pub fn coverage_pct(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.resolved() as f64 / self.requested as f64 * 100.0
        }
    }
}

/// Resolves `rs_ids` batch by batch. A failing batch counts as zero resolved
/// and the run moves on; `delay` is slept between consecutive batches.
pub fn resolve_all<R: AlleleResolver + ?Sized>(
    resolver: &R,
    rs_ids: &[String],
    assembly: Assembly,
    batch_size: usize,
    delay: Duration,
) -> ResolutionReport {
    let mut report = ResolutionReport {
        requested: rs_ids.len(),
        ..Default::default()
    };
    if rs_ids.is_empty() {
        return report;
    }

    let batch_size = batch_size.max(1);
    let total_batches = rs_ids.len().div_ceil(batch_size);
    info!(
        "Fetching alleles for {} rs-IDs in {} batches ({})",
        rs_ids.len(),
        total_batches,
        assembly
    );

    for (i, batch) in rs_ids.chunks(batch_size).enumerate() {
        if i > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }
        report.batches += 1;
        match resolver.fetch_batch(batch, assembly) {
            Ok(alleles) => {
                debug!("Batch {}/{}: {} resolved", i + 1, total_batches, alleles.len());
                report.alleles.extend(alleles);
            }
            Err(e) => {
                report.failed_batches += 1;
                warn!("Error fetching batch {}/{}: {:#}", i + 1, total_batches, e);
            }
        }
    }

    info!(
        "Successfully fetched alleles for {}/{} variants ({:.1}%), {} failed batches",
        report.resolved(),
        report.requested,
        report.coverage_pct(),
        report.failed_batches
    );
    report
}
