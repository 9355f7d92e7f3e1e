use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Duration,
};

use tracing_subscriber::{filter::LevelFilter, fmt};

use munim_app::cli::{
    Cli, Commands, ExtractArgs, ModelsArgs, ModelsCommands, ProcessArgs, StatusFormat,
};
use munim_app::config::{self, ExportConfig};
use munim_app::constants::{DEFAULT_MODEL_CHAIN, MAX_INLINE_DOCUMENT_BYTES};
use munim_app::error::AppError;
use munim_app::pipeline::{
    DocumentKind, ExtractionRequest, InvoiceRecord, Voucher, VoucherOptions, build_vouchers,
    render_csv, render_tally_xml,
};
use munim_app::services::{
    BatchOptions, BatchOrchestrator, ExtractorService, ModelRegistry, PipelineContext,
    PipelineError, QuotaCounter, QuotaStatus, RegistrySnapshot, build_pipeline_context,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Process(_)) | Some(Commands::Extract(_)) => match cli.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Models(_)) => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        None => LevelFilter::WARN,
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Process(args)) => run_process(args).await,
        Some(Commands::Extract(args)) => run_extract(args).await,
        Some(Commands::Models(args)) => run_models(args),
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

async fn run_process(args: ProcessArgs) -> Result<(), AppError> {
    let app_config = config::load()?;
    let documents = collect_documents(&args.inputs)?;
    let requests = load_requests(&documents)?;

    let context = build_pipeline_context(&app_config.extraction, args.model.as_deref())?;
    let batch_size = args.batch_size.unwrap_or(app_config.extraction.batch_size);
    let orchestrator = BatchOrchestrator::new(
        Arc::new(ExtractorService::from_context(&context)),
        BatchOptions::builder()
            .batch_size(batch_size)
            .group_pause(Duration::from_millis(app_config.extraction.group_pause_ms))
            .concurrency(app_config.extraction.concurrency)
            .build(),
    );

    tracing::info!(
        event = "process_start",
        documents = requests.len(),
        batch_size,
        "starting extraction run"
    );
    let records = orchestrator.process_all(&requests).await;

    let voucher_options = VoucherOptions::builder()
        .company(args.company.clone())
        .counterparty(args.party.clone())
        .voucher_type(args.voucher_type.clone())
        .build();
    let vouchers = build_vouchers(&records, &voucher_options);

    let (csv_path, xml_path) = export_paths(&args, &app_config.export);
    write_export(&csv_path, render_csv(&records))?;
    write_export(&xml_path, render_tally_xml(&vouchers, &voucher_options))?;

    print_run_summary(&records, &vouchers, &csv_path, &xml_path, &context).await;
    Ok(())
}

async fn run_extract(args: ExtractArgs) -> Result<(), AppError> {
    let app_config = config::load()?;
    let document = validated_document(&args.input)?;
    let requests = load_requests(std::slice::from_ref(&document))?;

    let context = build_pipeline_context(&app_config.extraction, args.model.as_deref())?;
    let orchestrator = BatchOrchestrator::new(
        Arc::new(ExtractorService::from_context(&context)),
        BatchOptions::builder()
            .batch_size(app_config.extraction.batch_size)
            .group_pause(Duration::from_millis(app_config.extraction.group_pause_ms))
            .concurrency(app_config.extraction.concurrency)
            .build(),
    );

    let records = orchestrator.process_all(&requests).await;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| AppError::from(PipelineError::message("no record produced")))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn run_models(args: ModelsArgs) -> Result<(), AppError> {
    let app_config = config::load()?;
    let mut registry =
        ModelRegistry::from_chain(DEFAULT_MODEL_CHAIN, app_config.extraction.failure_limit);
    let quota = QuotaCounter::new(app_config.extraction.daily_call_limit);

    match args.command {
        ModelsCommands::Status(status_args) => {
            print_models_status(&registry, &quota, status_args.format)
        }
        ModelsCommands::Reset => {
            registry.reset_all();
            println!(
                "model registry reset; {} candidate(s) restored",
                registry.len()
            );
            print_models_status(&registry, &quota, StatusFormat::Text)
        }
    }
}

fn print_models_status(
    registry: &ModelRegistry,
    quota: &QuotaCounter,
    format: StatusFormat,
) -> Result<(), AppError> {
    let snapshot = registry.snapshot();
    let quota_status = quota.snapshot();

    match format {
        StatusFormat::Json => {
            let payload = serde_json::json!({
                "available_count": snapshot.available,
                "total_count": snapshot.total,
                "models": snapshot.candidates,
                "quota": quota_status,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        StatusFormat::Text => {
            print!("{}", render_model_status(&snapshot));
            println!(
                "call budget: {} of {} used",
                quota_status.calls_made, quota_status.daily_limit
            );
        }
    }
    Ok(())
}

fn render_model_status(snapshot: &RegistrySnapshot) -> String {
    let mut out = format!(
        "{} of {} model(s) available\n",
        snapshot.available, snapshot.total
    );
    for candidate in &snapshot.candidates {
        let state = if candidate.available {
            "available"
        } else {
            "disabled"
        };
        out.push_str(&format!(
            "  [{}] {} ({}) {} failures {}/{}\n",
            candidate.rank,
            candidate.id,
            candidate.display_name,
            state,
            candidate.failures,
            candidate.failure_limit
        ));
        if let Some(error) = &candidate.last_error {
            out.push_str(&format!("      last error: {error}\n"));
        }
    }
    out
}

async fn print_run_summary(
    records: &[InvoiceRecord],
    vouchers: &[Voucher],
    csv_path: &Path,
    xml_path: &Path,
    context: &PipelineContext,
) {
    let models = context.models.lock().await.snapshot();
    let quota = context.quota.lock().await.snapshot();
    print!(
        "{}",
        render_run_summary(records, vouchers, csv_path, xml_path, &models, &quota)
    );
}

fn render_run_summary(
    records: &[InvoiceRecord],
    vouchers: &[Voucher],
    csv_path: &Path,
    xml_path: &Path,
    models: &RegistrySnapshot,
    quota: &QuotaStatus,
) -> String {
    let failed: Vec<&InvoiceRecord> = records.iter().filter(|record| record.is_error()).collect();
    let mut out = format!(
        "processed {} document(s): {} extracted, {} failed, {} voucher(s) generated\n",
        records.len(),
        records.len() - failed.len(),
        failed.len(),
        vouchers.len()
    );

    if !failed.is_empty() {
        out.push_str("failed documents:\n");
        for record in failed {
            out.push_str(&format!(
                "  - {} :: {}\n",
                record.identifier,
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    out.push_str(&format!("csv report: {}\n", csv_path.display()));
    out.push_str(&format!("tally vouchers: {}\n", xml_path.display()));
    out.push_str(&render_model_status(models));
    out.push_str(&format!(
        "model calls used: {} of {} daily budget\n",
        quota.calls_made, quota.daily_limit
    ));
    out
}

fn document_kind_for_path(path: &Path) -> Option<DocumentKind> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(DocumentKind::from_extension)
}

/// Expands files and directories into a validated document list. Directories
/// are walked one level deep, entries in name order.
fn collect_documents(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, AppError> {
    let mut documents = Vec::new();
    for input in inputs {
        let metadata = fs::metadata(input).map_err(|source| AppError::Io {
            path: input.clone(),
            source,
        })?;

        if metadata.is_file() {
            documents.push(validated_document(input)?);
            continue;
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(input).map_err(|source| AppError::Io {
            path: input.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| AppError::Io {
                path: input.clone(),
                source,
            })?;
            let entry_path = entry.path();
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            if document_kind_for_path(&entry_path).is_none() {
                continue;
            }
            entries.push(entry_path);
        }

        if entries.is_empty() {
            return Err(AppError::EmptyInputDir {
                path: input.clone(),
            });
        }
        entries.sort();
        for entry_path in entries {
            documents.push(validated_document(&entry_path)?);
        }
    }
    Ok(documents)
}

fn validated_document(path: &Path) -> Result<PathBuf, AppError> {
    if document_kind_for_path(path).is_none() {
        return Err(AppError::UnsupportedInput {
            path: path.to_path_buf(),
        });
    }
    let metadata = fs::metadata(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.len() > MAX_INLINE_DOCUMENT_BYTES as u64 {
        return Err(AppError::InputTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: MAX_INLINE_DOCUMENT_BYTES,
        });
    }
    Ok(path.to_path_buf())
}

fn load_requests(documents: &[PathBuf]) -> Result<Vec<ExtractionRequest>, AppError> {
    let mut requests = Vec::with_capacity(documents.len());
    for path in documents {
        let Some(kind) = document_kind_for_path(path) else {
            return Err(AppError::UnsupportedInput {
                path: path.clone(),
            });
        };
        let bytes = fs::read(path).map_err(|source| AppError::Io {
            path: path.clone(),
            source,
        })?;
        requests.push(ExtractionRequest::new(
            document_identifier(path),
            bytes,
            kind,
        ));
    }
    Ok(requests)
}

/// Records are keyed by file name, matching what operators see on disk.
fn document_identifier(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn export_paths(args: &ProcessArgs, export: &ExportConfig) -> (PathBuf, PathBuf) {
    let out_dir = args
        .out
        .clone()
        .unwrap_or_else(|| export.output_dir.clone());
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let csv_path = args
        .csv
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("invoices-{stamp}.csv")));
    let xml_path = args
        .xml
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("vouchers-{stamp}.xml")));
    (csv_path, xml_path)
}

fn write_export(path: &Path, contents: String) -> Result<(), AppError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| AppError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| AppError::Write {
        path: path.to_path_buf(),
        source,
    })
}
