use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use flare_gis::{
    FieldMapping, GeometryKind, GisStore, ImportMode, ImportService, ParsedSource,
};

#[derive(Parser, Debug)]
#[command(
    name = "gis-import",
    author,
    version,
    about = "Import GIS features into a Flare database",
    long_about = "Parses an uploaded file (GeoJSON, KML, KMZ, zipped shapefile, CSV) \
                  or pulls a paginated remote feature service, previews the result, \
                  and reconciles it into a layer.\n\n\
                  Merge mode upserts by external id and never deletes; replace mode \
                  clears the previous import for the layer first."
)]
struct Args {
    /// Flare SQLite database (created if missing)
    #[arg(short, long)]
    db: PathBuf,

    /// Target layer name (created if missing, using the source geometry)
    #[arg(short, long)]
    layer: String,

    /// File to import
    #[arg(short, long, conflicts_with = "url")]
    file: Option<PathBuf>,

    /// Remote feature service layer URL
    #[arg(short, long)]
    url: Option<String>,

    /// Server-side filter expression (remote only), forwarded verbatim
    #[arg(long, requires = "url")]
    filter: Option<String>,

    /// Import mode
    #[arg(long, default_value = "merge")]
    mode: String,

    /// Source column feeding the feature title
    #[arg(long)]
    title_column: Option<String>,

    /// Save the import as a named config for later refresh
    #[arg(long)]
    save_config: Option<String>,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    let Some(mode) = ImportMode::parse(&args.mode) else {
        bail!("unknown mode {:?} (expected merge or replace)", args.mode);
    };

    let store = GisStore::open(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;
    let service = ImportService::new(Arc::new(store)).context("failed to build import service")?;

    let mapping = FieldMapping {
        title: args.title_column.clone(),
        ..FieldMapping::default()
    };

    let (stats, config_id) = if let Some(path) = &args.file {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("file path has no usable name")?
            .to_string();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let parsed = service
            .preview_upload(&filename, &bytes)
            .context("upload rejected")?;
        print_preview(&parsed);

        let layer = resolve_layer(&service, &args.layer, parsed.geometry_kind)?;
        service
            .import_file(
                layer,
                &filename,
                &bytes,
                mode,
                &mapping,
                None,
                args.save_config.as_deref(),
            )
            .context("import failed")?
    } else if let Some(url) = &args.url {
        // Preview comes out of the same fetch the import uses; a remote
        // pull is too expensive to run twice.
        log::info!("Fetching {url}...");
        let layer = resolve_layer(&service, &args.layer, GeometryKind::Point)?;
        service
            .import_remote(
                layer,
                url,
                args.filter.as_deref(),
                mode,
                &mapping,
                None,
                args.save_config.as_deref(),
            )
            .await
            .context("remote import failed")?
    } else {
        bail!("either --file or --url is required");
    };

    log::info!(
        "Done: {} imported, {} updated, {} skipped, {} errors",
        stats.imported,
        stats.updated,
        stats.skipped,
        stats.errors
    );
    if let Some(config_id) = config_id {
        log::info!("Saved as config {config_id}; re-run with a refresh to pull updates");
    }
    Ok(())
}

fn resolve_layer(
    service: &ImportService,
    name: &str,
    kind: GeometryKind,
) -> Result<flare_gis::LayerId> {
    if let Some(layer) = service.store().get_layer_by_name(name)? {
        return Ok(layer.id);
    }
    log::info!("Layer {name:?} not found, creating it as {kind}");
    let layer = service.store().create_layer(name, kind)?;
    Ok(layer.id)
}

fn print_preview(parsed: &ParsedSource) {
    log::info!(
        "Parsed {} features ({})",
        parsed.feature_count,
        parsed.geometry_kind
    );
    for field in &parsed.fields {
        let samples = parsed
            .samples
            .get(&field.name)
            .map(|s| s.join(", "))
            .unwrap_or_default();
        log::info!("  {} ({:?}): {}", field.name, field.field_type, samples);
    }
}
