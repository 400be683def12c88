use std::fs::File;
use std::io;
use std::sync::Arc;

use anyhow::ensure;
use colored::Colorize;

use arkiv_digest::DigestAlgorithm;
use arkiv_offer::{MultiplexedStreamWriter, OfferStore};
use arkiv_rebuild::{
    DocumentStore, FileOffsetRepository, InMemoryDocumentStore, InMemoryLifecycleStore,
    LifecycleStore, LocalOfferSource, OfferSource, OffsetRepository, RebuildCollection,
    RebuildConfig, RebuildRequest, RebuildService, RebuildStatus,
};
use arkiv_types::{DataCategory, Order, Tenant};

use crate::cli::*;
use crate::config::ArkivConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = ArkivConfig::load(cli.config.as_deref())?;
    let tenant = Tenant(cli.tenant);
    let algorithm: DigestAlgorithm = config.digest_algorithm.parse()?;
    let store = Arc::new(
        OfferStore::open(&config.root)?
            .with_validator_pool_size(config.validator_pool_size)
            .with_cursor_page_size(config.cursor_page_size),
    );

    match cli.command {
        Command::Put(args) => cmd_put(&store, tenant, algorithm, args),
        Command::BulkPut(args) => cmd_bulk_put(&store, tenant, algorithm, args),
        Command::Get(args) => cmd_get(&store, tenant, args),
        Command::Digest(args) => cmd_digest(&store, tenant, algorithm, args),
        Command::Delete(args) => cmd_delete(&store, tenant, args),
        Command::Listing(args) => cmd_listing(&store, tenant, args),
        Command::Capacity(args) => cmd_capacity(&store, tenant, args),
        Command::Audit(args) => cmd_audit(&store, tenant, algorithm, args),
        Command::Rebuild(args) => cmd_rebuild(&config, store, tenant, args),
    }
}

fn container(category: &str, tenant: Tenant) -> anyhow::Result<(DataCategory, String)> {
    let category: DataCategory = category.parse()?;
    let container = category.container_name(tenant);
    Ok((category, container))
}

fn cmd_put(
    store: &OfferStore,
    tenant: Tenant,
    algorithm: DigestAlgorithm,
    args: PutArgs,
) -> anyhow::Result<()> {
    let (category, container) = container(&args.category, tenant)?;
    let mut file = File::open(&args.file)?;
    let result = store.put(&container, &args.object_id, &mut file, category, algorithm)?;
    println!(
        "{} {} stored ({} bytes)",
        "✓".green().bold(),
        args.object_id.bold(),
        result.size
    );
    println!("  Digest: {}", result.digest.cyan());
    Ok(())
}

fn cmd_bulk_put(
    store: &OfferStore,
    tenant: Tenant,
    algorithm: DigestAlgorithm,
    args: BulkPutArgs,
) -> anyhow::Result<()> {
    ensure!(
        args.object_ids.len() == args.files.len(),
        "{} ids for {} files",
        args.object_ids.len(),
        args.files.len()
    );
    let (category, container) = container(&args.category, tenant)?;

    let mut writer = MultiplexedStreamWriter::new(Vec::new());
    for file in &args.files {
        writer.append(&std::fs::read(file)?)?;
    }
    let stream = writer.finish()?;

    let written = store.bulk_put(
        &container,
        &args.object_ids,
        stream.as_slice(),
        category,
        algorithm,
    )?;
    println!(
        "{} {} of {} objects stored",
        "✓".green().bold(),
        written.len(),
        args.object_ids.len()
    );
    for object in &written {
        println!(
            "  {}  {}  {} bytes",
            object.object_id.bold(),
            object.digest.cyan(),
            object.size
        );
    }
    Ok(())
}

fn cmd_get(store: &OfferStore, tenant: Tenant, args: GetArgs) -> anyhow::Result<()> {
    let (_, container) = container(&args.category, tenant)?;
    let (mut reader, size) = store.get_object(&container, &args.object_id)?;
    match &args.output {
        Some(path) => {
            let mut out = File::create(path)?;
            io::copy(&mut reader, &mut out)?;
            println!(
                "{} {} ({} bytes) written to {}",
                "✓".green().bold(),
                args.object_id.bold(),
                size,
                path.display()
            );
        }
        None => {
            io::copy(&mut reader, &mut io::stdout().lock())?;
        }
    }
    Ok(())
}

fn cmd_digest(
    store: &OfferStore,
    tenant: Tenant,
    algorithm: DigestAlgorithm,
    args: DigestArgs,
) -> anyhow::Result<()> {
    let (_, container) = container(&args.category, tenant)?;
    let digest = store.get_object_digest(&container, &args.object_id, algorithm, args.recompute)?;
    println!("{}:{}", algorithm, digest.cyan());
    Ok(())
}

fn cmd_delete(store: &OfferStore, tenant: Tenant, args: DeleteArgs) -> anyhow::Result<()> {
    let (category, container) = container(&args.category, tenant)?;
    store.delete_object(&container, &args.object_id, category)?;
    println!("{} {} deleted", "✓".green().bold(), args.object_id.bold());
    Ok(())
}

fn cmd_listing(store: &OfferStore, tenant: Tenant, args: ListingArgs) -> anyhow::Result<()> {
    let (_, container) = container(&args.category, tenant)?;
    let order = if args.desc { Order::Desc } else { Order::Asc };
    let entries = store.get_listing(&container, args.offset, args.limit, order)?;
    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{:>8}  {:6}  {}  {}",
            entry.sequence.to_string().yellow(),
            format!("{:?}", entry.action).to_uppercase(),
            entry.time.to_rfc3339(),
            entry.object_id.bold()
        );
    }
    Ok(())
}

fn cmd_capacity(store: &OfferStore, tenant: Tenant, args: CapacityArgs) -> anyhow::Result<()> {
    let (_, container) = container(&args.category, tenant)?;
    let capacity = store.capacity(&container)?;
    println!("Container {}", container.bold());
    println!("  Objects: {}", capacity.object_count);
    println!("  Used:    {} bytes", capacity.used_bytes);
    println!("  Usable:  {} bytes", capacity.usable_space);
    Ok(())
}

fn cmd_audit(
    store: &OfferStore,
    tenant: Tenant,
    algorithm: DigestAlgorithm,
    args: AuditArgs,
) -> anyhow::Result<()> {
    let (_, container) = container(&args.category, tenant)?;
    let cursor = store.create_cursor(&container)?;
    let mut checked = 0usize;
    let mut conflicts = 0usize;

    while let Some(page) = store.next(cursor)? {
        for object in &page {
            let claimed =
                store.get_object_digest(&container, &object.object_id, algorithm, false)?;
            let actual =
                store.get_object_digest(&container, &object.object_id, algorithm, true)?;
            checked += 1;
            if claimed != actual {
                conflicts += 1;
                println!(
                    "{} {}: claimed {} actual {}",
                    "conflict".red().bold(),
                    object.object_id.bold(),
                    claimed.dimmed(),
                    actual.cyan()
                );
            }
        }
    }
    store.finalize_cursor(cursor);

    if conflicts == 0 {
        println!("{} {} objects verified, no conflicts", "✓".green().bold(), checked);
        Ok(())
    } else {
        println!("{} {} of {} objects in conflict", "✗".red().bold(), conflicts, checked);
        anyhow::bail!("audit found {conflicts} digest conflicts")
    }
}

fn cmd_rebuild(
    config: &ArkivConfig,
    store: Arc<OfferStore>,
    tenant: Tenant,
    args: RebuildArgs,
) -> anyhow::Result<()> {
    let collection: RebuildCollection = args.collection.parse()?;
    let offsets = Arc::new(FileOffsetRepository::open(config.offsets_path()));
    let service = RebuildService::new(
        Arc::new(LocalOfferSource::new(store)) as Arc<dyn OfferSource>,
        Arc::new(InMemoryDocumentStore::default()) as Arc<dyn DocumentStore>,
        Arc::new(InMemoryLifecycleStore::default()) as Arc<dyn LifecycleStore>,
        Arc::clone(&offsets) as Arc<dyn OffsetRepository>,
    )
    .with_config(RebuildConfig {
        bulk_size: config.rebuild.bulk_size,
        retry_budget: config.rebuild.retry_budget,
        backoff_max_ms: config.rebuild.backoff_max_ms,
    });

    let response = service.reconstruct(&RebuildRequest {
        collection,
        tenant,
        limit: args.limit,
    });
    let offset = offsets.get(tenant, collection.name())?;
    match response.status {
        RebuildStatus::Ok => {
            println!(
                "{} {} rebuilt for tenant {}, checkpoint at {}",
                "✓".green().bold(),
                collection.to_string().bold(),
                tenant,
                offset.to_string().yellow()
            );
            Ok(())
        }
        RebuildStatus::Ko => {
            println!(
                "{} {} rebuild failed for tenant {}, checkpoint left at {}",
                "✗".red().bold(),
                collection.to_string().bold(),
                tenant,
                offset.to_string().yellow()
            );
            anyhow::bail!("reconstruction ended KO")
        }
    }
}
