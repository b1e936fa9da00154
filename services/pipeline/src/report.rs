use valorimob::features::DerivedDataset;
use valorimob::ingestion::IngestionStatus;
use valorimob::pipeline::{RunSummary, SourceOutcome, Staged, SUMMARY_TOP_N};
use valorimob::publish::PublishReceipt;
use valorimob::ranking::{RankingRow, RankingTable};
use valorimob::valuation::{RegressionMetrics, ValuationOutcome};

pub(crate) fn render_run(summary: &RunSummary) {
    println!("ValorImob run");
    println!(
        "  Started {}  finished {}",
        summary.started_at.to_rfc3339(),
        summary.finished_at.to_rfc3339()
    );
    render_sources(&summary.sources);
    println!(
        "Features: {} rows derived, {} excluded",
        summary.derived_rows, summary.excluded_rows
    );
    println!("Model: {} held-out rows scored", summary.scored_rows);
    render_metrics(&summary.metrics);
    println!("Ranking: {} neighborhoods", summary.neighborhoods);
    render_rows(&summary.top);
    render_receipts(&summary.published);
}

pub(crate) fn render_sources(outcomes: &[SourceOutcome]) {
    println!("Ingestion:");
    for outcome in outcomes {
        match outcome {
            SourceOutcome::Ingested { report, receipt } => {
                let status = match report.status() {
                    IngestionStatus::Complete => "complete",
                    IngestionStatus::Degraded => "degraded",
                };
                println!(
                    "  {} -> {}: {} rows from {} partitions ({status})",
                    report.source,
                    report.dataset,
                    report.rows,
                    report.succeeded.len()
                );
                for failure in &report.failed {
                    println!(
                        "    skipped {} [{}]: {}",
                        failure.partition,
                        failure.reason.kind(),
                        failure.reason
                    );
                }
                println!("    published to {}", receipt.object_uri);
            }
            SourceOutcome::Skipped { kind, reason } => {
                println!("  {kind:?} skipped: {reason}");
            }
        }
    }
}

pub(crate) fn render_derived(staged: &Staged<DerivedDataset>) {
    let derived = &staged.output;
    let exclusions = &derived.exclusions;
    println!("Features: {} rows derived", derived.rows.len());
    println!(
        "  Excluded: {} missing price, {} non-positive price, {} missing area, {} non-positive area",
        exclusions.missing_price,
        exclusions.non_positive_price,
        exclusions.missing_area,
        exclusions.non_positive_area
    );
    println!(
        "  Unknown construction year: {}",
        exclusions.unknown_construction_year
    );
    match derived.historical_key {
        Some(key) => println!(
            "  Historical index joined on '{key}' ({} unusable values)",
            exclusions.unusable_historical_values
        ),
        None => println!("  Historical index not joined"),
    }
    render_receipts(&staged.receipts);
}

pub(crate) fn render_trained(staged: &Staged<ValuationOutcome>) {
    let outcome = &staged.output;
    println!(
        "Model: {} trees, {} training rows, {} held-out rows scored",
        outcome.model.params.n_estimators,
        outcome.model.training_rows,
        outcome.scored.len()
    );
    if outcome.dropped_rows > 0 {
        println!("  Dropped rows: {}", outcome.dropped_rows);
    }
    render_metrics(&outcome.model.metrics);
    render_receipts(&staged.receipts);
}

pub(crate) fn render_ranking(staged: &Staged<RankingTable>) {
    let ranking = &staged.output;
    println!("Ranking: {} neighborhoods", ranking.rows.len());
    if ranking.neighborhood_column_missing {
        println!("  Warning: scored rows had no neighborhood; all grouped together");
    }
    render_rows(ranking.top(SUMMARY_TOP_N));
    render_receipts(&staged.receipts);
}

fn render_metrics(metrics: &RegressionMetrics) {
    let optional = |value: Option<f64>| {
        value
            .map(|value| format!("{value:.4}"))
            .unwrap_or_else(|| "n/a".to_string())
    };
    println!(
        "  MSE {:.2}  R2 {}  explained variance {}",
        metrics.mse,
        optional(metrics.r2),
        optional(metrics.explained_variance)
    );
}

fn render_rows(rows: &[RankingRow]) {
    for (position, row) in rows.iter().enumerate() {
        let percentage = row
            .valorizacao_percentual
            .map(|value| format!("{value:+.2}%"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:>2}. {:<24} {:>9} {:>14.2} ({} imoveis)",
            position + 1,
            row.bairro,
            percentage,
            row.valorizacao_absoluta,
            row.qtde_imoveis
        );
    }
}

fn render_receipts(receipts: &[PublishReceipt]) {
    for receipt in receipts {
        match (&receipt.table_id, receipt.rows) {
            (Some(table_id), Some(rows)) => println!(
                "  Published {} -> {} and {table_id} ({rows} rows)",
                receipt.artifact, receipt.object_uri
            ),
            _ => println!("  Published {} -> {}", receipt.artifact, receipt.object_uri),
        }
    }
}
