use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use webfs::config::{self, Config};
use webfs::fs::Filesystem;
use webfs::thumb::{Registry, Size, Thumbnail};
use webfs::{logging, pregen};

/// Shared flags for commands that render thumbnails.
#[derive(clap::Args, Clone, Copy)]
struct SizeArgs {
    /// Thumbnail width (defaults to thumbnails.width)
    #[arg(long)]
    width: Option<u32>,

    /// Thumbnail height (defaults to thumbnails.height)
    #[arg(long)]
    height: Option<u32>,
}

impl SizeArgs {
    fn resolve(self, config: &Config) -> Size {
        Size::new(
            self.width.unwrap_or(config.thumbnails.width),
            self.height.unwrap_or(config.thumbnails.height),
        )
    }
}

fn version_string() -> &'static str {
    let on_tag = env!("WEBFS_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("WEBFS_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "webfs")]
#[command(about = "Thumbnails for a directory tree served over the web")]
#[command(long_about = "\
Thumbnails for a directory tree served over the web

Every file or directory below the mount gets a small JPEG preview:

  photos, PNG, GIF, WebP, TIFF   decoded and resized in-process
  SVG, PDF, PostScript           rasterized with inkscape (if installed)
  videos                         midpoint frame via ffprobe + ffmpeg (if installed)
  directories                    .icon.png / .icon.jpg, else a mosaic of children

JPEG and PNG photos also get a cached display-sized copy (1366x768) via 'view'.

Thumbnails are cached (on disk by default) and regenerated when the source
file changes. Paths are relative to the mount; dotfiles are never served.

Run 'webfs gen-config' to generate a documented webfs.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (missing file means stock defaults)
    #[arg(long, default_value = "webfs.toml", global = true)]
    config: PathBuf,

    /// Directory tree to expose (overrides `mount`)
    #[arg(long, global = true)]
    mount: Option<String>,

    /// Thumbnail cache directory; "" keeps thumbnails in memory (overrides `cache.dir`)
    #[arg(long, global = true)]
    cache_dir: Option<String>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the thumbnail of one path as JPEG
    Thumb {
        /// Path relative to the mount
        path: String,
        #[command(flatten)]
        size: SizeArgs,
        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write the display-sized copy of a JPEG or PNG image
    View {
        /// Path relative to the mount
        path: String,
        /// Output file (defaults to stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Render thumbnails for the whole mount in parallel
    Pregen(SizeArgs),
    /// Drop every cached thumbnail of one path
    Invalidate {
        /// Path relative to the mount
        path: String,
    },
    /// Print a stock webfs.toml with all options documented
    GenConfig,
}

impl Cli {
    /// Command-line values layered over the config file.
    fn overrides(&self) -> toml::Value {
        let mut root = toml::Table::new();
        if let Some(mount) = &self.mount {
            root.insert("mount".into(), toml::Value::String(mount.clone()));
        }
        if let Some(dir) = &self.cache_dir {
            let mut cache = toml::Table::new();
            cache.insert("dir".into(), toml::Value::String(dir.clone()));
            root.insert("cache".into(), toml::Value::Table(cache));
        }
        toml::Value::Table(root)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose).map_err(|err| err as Box<dyn std::error::Error>)?;

    match &cli.command {
        Command::Thumb { path, size, output } => {
            let (config, fs) = setup(&cli)?;
            let size = size.resolve(&config);
            let thumbnail = fs.thumbnail(path, size)?;
            info!(
                path = %path,
                %size,
                generated = thumbnail.generated,
                "thumbnail ready"
            );
            write_jpeg(thumbnail, output.as_ref())?;
        }
        Command::View { path, output } => {
            let (_, fs) = setup(&cli)?;
            let view = fs.view(path)?;
            info!(path = %path, generated = view.generated, "view ready");
            write_jpeg(view, output.as_ref())?;
        }
        Command::Pregen(size) => {
            let (config, fs) = setup(&cli)?;
            let size = size.resolve(&config);
            let workers = config::effective_threads(&config.processing);
            println!("==> Pregenerating {size} thumbnails in {}", fs.root().display());
            let stats = pregen::pregenerate(&fs, size, workers)?;
            println!("Thumbnails: {stats}");
        }
        Command::Invalidate { path } => {
            let (_, fs) = setup(&cli)?;
            fs.invalidate(path)?;
            println!("Invalidated {path}");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn write_jpeg(mut jpeg: Thumbnail, output: Option<&PathBuf>) -> io::Result<()> {
    let mut out: Box<dyn Write> = match output {
        Some(file) => Box::new(BufWriter::new(File::create(file)?)),
        None => Box::new(io::stdout().lock()),
    };
    io::copy(&mut jpeg.reader, &mut out)?;
    out.flush()
}

/// Load config, open the cache, locate external tools, and mount the tree.
fn setup(cli: &Cli) -> Result<(Config, Filesystem), Box<dyn std::error::Error>> {
    let config = config::load_config(&cli.config, Some(cli.overrides()))?;
    let cache = config.cache.open()?;
    let registry = Registry::with_defaults(&config.thumbnails, &config.tools);
    let fs = Filesystem::new(
        config.mount_path(),
        cache,
        Arc::new(registry),
        config.thumbnails.quality(),
    )?;
    Ok((config, fs))
}
