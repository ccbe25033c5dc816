use std::io::{Read, Write};

use anyhow::{bail, Context};
use bytes::Bytes;
use colored::Colorize;
use objshard_shard::{expand_endpoints, ListOptions, ShardConfig, ShardRouter, ShardedStore};
use objshard_store::{ObjectInfo, ObjectStore};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli, config))
}

/// Config file first, then command-line overrides.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<ShardConfig> {
    let mut config = match &cli.config {
        Some(path) => ShardConfig::load(path)?,
        None => {
            let Some(endpoint) = &cli.endpoint else {
                bail!("no store configured: pass --config or --endpoint");
            };
            ShardConfig::new("file", endpoint.clone(), 1)
        }
    };
    if let Some(backend) = &cli.backend {
        config.backend = backend.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(shards) = cli.shards {
        config.shards = shards;
    }
    config.validate()?;
    debug!(?config, "resolved store config");
    Ok(config)
}

async fn dispatch(cli: Cli, config: ShardConfig) -> anyhow::Result<()> {
    let format = cli.format;
    let open = || {
        ShardedStore::from_config(&config).with_context(|| format!("cannot open {}", config.endpoint))
    };
    match cli.command {
        Command::Route(args) => cmd_route(&config, &args, &format),
        Command::Ls(args) => cmd_ls(&open()?, args, &format).await,
        Command::Put(args) => cmd_put(&open()?, args).await,
        Command::Get(args) => cmd_get(&open()?, args).await,
        Command::Head(args) => cmd_head(&open()?, args, &format).await,
        Command::Rm(args) => {
            open()?.delete(&args.key).await?;
            println!("{} Deleted {}", "✓".green(), args.key.yellow());
            Ok(())
        }
        Command::Info => cmd_info(&open()?, &config, &format),
        Command::Init => {
            let store = open()?;
            store.create().await?;
            println!(
                "{} Initialized {} shards at {}",
                "✓".green().bold(),
                store.shard_count(),
                config.endpoint.bold()
            );
            Ok(())
        }
    }
}

fn cmd_route(config: &ShardConfig, args: &RouteArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let endpoints = expand_endpoints(&config.endpoint, config.shards)?;
    let router = ShardRouter::new(config.shards)?;
    for key in &args.keys {
        let shard = router.pick(key);
        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "key": key, "shard": shard, "endpoint": endpoints[shard] })
            ),
            OutputFormat::Text => println!(
                "{}  {} {}",
                key.yellow(),
                format!("shard {shard}").bold(),
                endpoints[shard].dimmed()
            ),
        }
    }
    Ok(())
}

async fn cmd_ls(store: &ShardedStore, args: LsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let opts = ListOptions::new(args.prefix, args.marker, args.follow_links);
    let mut stream = store
        .list_all_with(&opts, Default::default())
        .await
        .context("listing failed")?;
    let limit = args.limit.unwrap_or(usize::MAX);
    let mut count = 0usize;
    while count < limit {
        let Some(item) = stream.next().await else { break };
        print_object(&item.context("listing failed")?, format)?;
        count += 1;
    }
    if matches!(format, OutputFormat::Text) {
        eprintln!("{} objects", count.to_string().bold());
    }
    Ok(())
}

fn print_object(obj: &ObjectInfo, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(obj)?),
        OutputFormat::Text if obj.is_dir => println!("{:>12}  {:<25}  {}", "DIR", "", obj.key.blue()),
        OutputFormat::Text => println!(
            "{:>12}  {:<25}  {}",
            obj.size,
            obj.modified.format("%Y-%m-%d %H:%M:%S UTC"),
            obj.key
        ),
    }
    Ok(())
}

async fn cmd_put(store: &ShardedStore, args: PutArgs) -> anyhow::Result<()> {
    let body = if args.source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read(&args.source).with_context(|| format!("failed to read {}", args.source))?
    };
    let size = body.len();
    store.put(&args.key, Bytes::from(body)).await?;
    println!(
        "{} Stored {} ({} bytes) on shard {}",
        "✓".green(),
        args.key.yellow(),
        size,
        store.shard_for(&args.key)
    );
    Ok(())
}

async fn cmd_get(store: &ShardedStore, args: GetArgs) -> anyhow::Result<()> {
    let data = store.get(&args.key, args.offset, args.limit).await?;
    let mut out = std::io::stdout().lock();
    out.write_all(&data)?;
    out.flush()?;
    Ok(())
}

async fn cmd_head(store: &ShardedStore, args: KeyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let obj = store.head(&args.key).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&obj)?),
        OutputFormat::Text => {
            println!("Key: {}", obj.key.yellow().bold());
            println!("  Size: {}", obj.size);
            println!("  Modified: {}", obj.modified);
            if let Some(class) = &obj.storage_class {
                println!("  Storage class: {}", class.cyan());
            }
            println!("  Shard: {}", store.shard_for(&obj.key));
        }
    }
    Ok(())
}

fn cmd_info(store: &ShardedStore, config: &ShardConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let limits = store.limits();
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "store": store.to_string(),
                "backend": config.backend,
                "shards": store.shard_count(),
                "endpoints": store.shards().iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                "limits": limits,
            })
        ),
        OutputFormat::Text => {
            println!("Store: {}", store.to_string().bold());
            println!("  Backend: {}", config.backend.cyan());
            for (i, shard) in store.shards().iter().enumerate() {
                println!("  shard {i}: {shard}");
            }
            println!("  Page size: {}", store.listing_config().page_size);
            println!("  Min part size: {}", limits.min_part_size);
            println!("  Max part size: {}", limits.max_part_size);
            println!("  Max part count: {}", limits.max_part_count);
        }
    }
    Ok(())
}
