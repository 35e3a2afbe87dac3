//! Sqpack CLI - browse, extract and search SqPack game archives.
//!
//! This is the main entry point for the sqpack command-line application.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sqpack::prelude::*;

/// Sqpack - SqPack game archive tool
#[derive(Parser)]
#[command(name = "sqpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The game's `sqpack` directory
    #[arg(short, long, global = true, env = "SQPACK_DIR", default_value = "sqpack")]
    sqpack: PathBuf,

    /// Text file of known paths, one per line
    #[arg(short, long, global = true, env = "SQPACK_NAMES")]
    names: Option<PathBuf>,

    /// Raise log verbosity (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder
    Ls {
        /// Folder path; the root when omitted
        #[arg(default_value = "")]
        path: String,

        /// Show type and size of each file
        #[arg(short, long)]
        long: bool,
    },

    /// Write a file's logical contents
    Cat {
        /// Full file path
        path: String,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show entry and resource details of a file
    Info {
        /// Full file path
        path: String,
    },

    /// Search the tree with a query
    Search {
        /// Query text, e.g. `type:texture AND NOT name:*.atex`
        query: String,

        /// Folder to search below
        #[arg(short, long, default_value = "")]
        root: String,

        /// Number of worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Time budget per item in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let tree = open_tree(&cli.sqpack, cli.names.as_deref())?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Ls { path, long } => cmd_ls(&tree, &path, long, &cancel)?,
        Commands::Cat { path, output } => cmd_cat(&tree, &path, output.as_deref(), &cancel)?,
        Commands::Info { path } => cmd_info(&tree, &path, &cancel)?,
        Commands::Search {
            query,
            root,
            threads,
            timeout_ms,
        } => cmd_search(&tree, &query, &root, threads, timeout_ms, &cancel)?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_tree(sqpack: &Path, names: Option<&Path>) -> Result<VirtualTree> {
    let start = Instant::now();
    let names = match names {
        Some(path) => PathListNameService::load(path)
            .with_context(|| format!("Failed to load path list {}", path.display()))?,
        None => PathListNameService::default(),
    };
    debug!(folders = names.folder_count(), files = names.file_count(), "loaded names");

    let tree = VirtualTree::open(sqpack, Arc::new(names), &TreeOptions::default())
        .with_context(|| format!("Failed to open archive at {}", sqpack.display()))?;
    debug!(elapsed = ?start.elapsed(), "opened archive");
    Ok(tree)
}

fn find_folder(tree: &VirtualTree, path: &str, cancel: &CancellationToken) -> Result<FolderId> {
    match tree.resolve_path(tree.root(), path, cancel)? {
        Some(folder) => Ok(folder),
        None => bail!("No such folder: {path}"),
    }
}

fn find_file(tree: &VirtualTree, path: &str, cancel: &CancellationToken) -> Result<FileId> {
    match tree.resolve_file(path, cancel)? {
        Some(file) => Ok(file),
        None => bail!("No such file: {path}"),
    }
}

fn cmd_ls(tree: &VirtualTree, path: &str, long: bool, cancel: &CancellationToken) -> Result<()> {
    let folder = find_folder(tree, path, cancel)?;
    tree.resolve_file_names(folder, cancel)
        .context("Failed to resolve folder")?;

    for child in tree.get_folders(folder)? {
        println!("{}", tree.folder_name(child)?);
    }

    let mut files = tree
        .get_files(folder)?
        .into_iter()
        .map(|id| Ok((tree.file_name(id)?, id)))
        .collect::<Result<Vec<_>>>()?;
    files.sort();

    for (name, id) in &files {
        if long {
            let info = tree.lookup(*id)?.info();
            println!("{:<8} {:>12} {}", info.file_type.name(), info.size, name);
        } else {
            println!("{name}");
        }
    }

    Ok(())
}

fn cmd_cat(tree: &VirtualTree, path: &str, output: Option<&Path>, cancel: &CancellationToken) -> Result<()> {
    let file = find_file(tree, path, cancel)?;
    let data = tree
        .lookup(file)?
        .read_all(cancel)
        .with_context(|| format!("Failed to read {path}"))?;

    match output {
        Some(output) => {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(output, &data).context("Failed to write output file")?;
            eprintln!("Wrote {} bytes to {}", data.len(), output.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(&data)
            .context("Failed to write to stdout")?,
    }

    Ok(())
}

fn cmd_info(tree: &VirtualTree, path: &str, cancel: &CancellationToken) -> Result<()> {
    let file = find_file(tree, path, cancel)?;
    let lookup = tree.lookup(file)?;
    let entry = tree.file(file)?;
    let info = lookup.info();

    println!("Path:        {}", tree.file_path(file)?);
    println!("Index:       {}", entry.index_id);
    println!("Name hash:   {:08x}", entry.name_hash);
    println!("Folder hash: {:08x}", entry.folder_hash);
    if let Some(full) = tree.file_full_path_hash(file)? {
        println!("Path hash:   {full:08x}");
    }
    println!("Type:        {}", info.file_type);
    println!("Size:        {}", info.size);
    println!("Reserved:    {}", info.reserved);
    println!("Occupied:    {}", info.occupied);
    println!("Blocks:      {}", info.block_count);

    let resource = lookup
        .as_resource(cancel)
        .with_context(|| format!("Failed to read {path}"))?;
    println!("Resource:    {}", resource.kind());
    match &resource {
        Resource::Texture(texture) => {
            println!(
                "  format {:#06x}, {}x{}x{}, {} mips, {} layers",
                texture.format(),
                texture.width(),
                texture.height(),
                texture.depth(),
                texture.mip_count(),
                texture.array_size()
            );
        }
        Resource::Model(model) => {
            let header = model.header;
            let (version, lods, materials) = (header.version, header.lod_count, header.materials);
            println!("  version {version}, {lods} LODs, {materials} materials");
        }
        Resource::ExcelHeader(sheet) => {
            println!(
                "  {} rows, {} columns, {} pages, {} languages",
                sheet.row_count,
                sheet.columns.len(),
                sheet.pages.len(),
                sheet.languages.len()
            );
        }
        Resource::ExcelPage(page) => println!("  {} rows", page.rows.len()),
        Resource::Text(text) => println!("  {} lines", text.text.lines().count()),
        Resource::Generic(_) => {}
    }

    Ok(())
}

/// Prints matches above a spinner fed by search progress.
struct SearchPrinter {
    spinner: ProgressBar,
    matches: AtomicUsize,
}

impl SearchObserver for SearchPrinter {
    fn folder_found(&self, tree: &VirtualTree, id: FolderId) {
        if let Ok(path) = tree.folder_path(id) {
            self.spinner.println(path);
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn file_found(&self, tree: &VirtualTree, id: FileId) {
        if let Ok(path) = tree.file_path(id) {
            self.spinner.println(path);
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn progress(&self, progress: &SearchProgress) {
        self.spinner.set_message(format!(
            "{:?} {}/{} {}",
            progress.state,
            progress.processed,
            progress.total,
            progress.last_item.as_deref().unwrap_or_default()
        ));
    }
}

fn cmd_search(
    tree: &VirtualTree,
    query: &str,
    root: &str,
    threads: Option<usize>,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let query = Query::parse(query).context("Invalid query")?;
    let root = find_folder(tree, root, cancel)?;

    let mut options = SearchOptions {
        item_timeout: Duration::from_millis(timeout_ms),
        ..SearchOptions::default()
    };
    if let Some(threads) = threads {
        options.threads = threads;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let printer = SearchPrinter {
        spinner,
        matches: AtomicUsize::new(0),
    };
    let done = Searcher::new(tree, options)
        .run_query(root, &query, &printer, cancel)
        .context("Search failed")?;

    printer.spinner.finish_and_clear();
    eprintln!(
        "{} matches in {} items ({:?})",
        printer.matches.load(Ordering::Relaxed),
        done.processed,
        done.elapsed
    );

    Ok(())
}
