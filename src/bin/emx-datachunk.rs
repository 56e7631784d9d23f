//! emx-datachunk CLI
//!
//! Create, insert, list, extract and remove data chunks in literate documents.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use emx_datachunk::{
    splice, Assembler, ChunkConfig, ChunkParams, Encoding, Format, LineRange, Loader, Scanner,
};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "emx-datachunk")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Embed files as data chunks in literate documents")]
struct Cli {
    /// Chunk engine name used in fences
    #[arg(long, global = true, default_value = "data")]
    engine: String,

    /// Base64 line width
    #[arg(long, global = true, default_value_t = 76)]
    width: usize,

    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a data chunk for a file
    Create {
        /// File to embed
        file: PathBuf,

        #[command(flatten)]
        chunk: ChunkArgs,
    },

    /// Insert a data chunk for a file into a document
    Insert {
        /// Document to modify
        document: PathBuf,

        /// File to embed
        file: PathBuf,

        /// Insert before this line (1-based, default: append)
        #[arg(short = 'l', long)]
        line: Option<usize>,

        /// Output document (default: modify in place)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        chunk: ChunkArgs,
    },

    /// List data chunks of a document
    #[command(name = "t")]
    List {
        /// Document to read (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },

    /// Decode data chunks of a document
    #[command(name = "x")]
    Extract {
        /// Document to read (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Only this chunk; written to stdout unless it has an output.file
        #[arg(long)]
        label: Option<String>,

        /// Directory for output.file targets
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,

        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Remove data chunks from a document
    #[command(name = "rm")]
    Remove {
        /// Document to modify
        document: PathBuf,

        /// Labels of the chunks to remove
        #[arg(long = "label", required = true)]
        labels: Vec<String>,

        /// Output document (default: modify in place)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct ChunkArgs {
    /// Chunk label
    #[arg(long)]
    label: Option<String>,

    /// Payload format (default: detected)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Body encoding (default: from format)
    #[arg(long, value_enum)]
    encoding: Option<EncodingArg>,

    /// Variable to load the data into
    #[arg(long)]
    output_var: Option<String>,

    /// File to write the data to at render time
    #[arg(long)]
    output_file: Option<String>,

    /// Loader expression for the output variable
    #[arg(long)]
    loader_function: Option<String>,

    /// Store an md5 checksum (always on for binary files)
    #[arg(long)]
    md5sum: bool,

    /// Echo the data into the rendered output
    #[arg(long)]
    echo: Option<bool>,

    /// Evaluation guard expression
    #[arg(long)]
    eval: Option<String>,

    /// Extra chunk options, e.g. 'fig.cap="x", results="hide"'
    #[arg(long)]
    options: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodingArg {
    Asis,
    Base64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ChunkConfig::default()
        .with_engine(cli.engine.clone())
        .with_line_width(cli.width);

    match cli.command {
        Commands::Create { file, chunk } => {
            let lines = build_chunk(&config, &file, chunk)?;
            let mut stdout = io::stdout().lock();
            for line in lines {
                writeln!(stdout, "{}", line)?;
            }
        }
        Commands::Insert { document, file, line, output, chunk } => {
            insert_chunk(&config, &document, &file, line, output, chunk)?;
        }
        Commands::List { input } => {
            list_chunks(&config, input)?;
        }
        Commands::Extract { input, label, directory, no_verify } => {
            extract_chunks(&config, input, label, &directory, no_verify)?;
        }
        Commands::Remove { document, labels, output } => {
            remove_chunks(&config, &document, &labels, output)?;
        }
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
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Apply front-end defaults and assemble the chunk
fn build_chunk(config: &ChunkConfig, file: &Path, args: ChunkArgs) -> Result<Vec<String>> {
    let data = fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    let binary = config.sniff.detect(&data).is_binary();

    let format = args.format.map(|f| match f {
        FormatArg::Text => Format::Text,
        FormatArg::Binary => Format::Binary,
    });
    let encoding = args.encoding.map(|e| match e {
        EncodingArg::Asis => Encoding::Asis,
        EncodingArg::Base64 => Encoding::Base64,
    });

    let (format, encoding, md5sum) = if binary && format.is_none() && encoding.is_none() {
        (Some(Format::Binary), Some(Encoding::Base64), true)
    } else {
        (format, encoding, args.md5sum)
    };

    let eval = match (&args.eval, &args.output_file) {
        (None, Some(path)) => Some(format!("!file.exists({})", emx_datachunk::options::quote(path))),
        (eval, _) => eval.clone(),
    };

    let params = ChunkParams {
        label: args.label,
        format,
        encoding,
        extra_options: args.options,
        output_var: args.output_var,
        output_file: args.output_file,
        loader_function: args.loader_function,
        md5sum,
        echo: args.echo,
        eval,
    };

    log::info!("embedding {} ({} bytes)", file.display(), data.len());
    Ok(Assembler::with_config(config).assemble(&data, &params)?)
}

fn read_document(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read: {}", path.display())),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

/// Write lines back using the original document's line ending and final newline
fn write_document(path: &Path, lines: &[String], original: &str) -> Result<()> {
    let trailing_newline = original.ends_with('\n') || original.is_empty();
    let text = splice::join_lines_with(lines, splice::line_ending(original), trailing_newline);
    fs::write(path, text).with_context(|| format!("Failed to write: {}", path.display()))
}

fn insert_chunk(
    config: &ChunkConfig,
    document: &Path,
    file: &Path,
    line: Option<usize>,
    output: Option<PathBuf>,
    args: ChunkArgs,
) -> Result<()> {
    let text = read_document(Some(document))?;
    let lines = splice::split_lines(&text);

    let chunk = build_chunk(config, file, args)?;
    let position = match line {
        Some(0) => bail!("Line numbers start at 1"),
        Some(n) => (n - 1) as isize,
        None => lines.len() as isize,
    };
    let updated = splice::insert_at(&lines, position, &chunk)?;

    let target = output.unwrap_or_else(|| document.to_path_buf());
    write_document(&target, &updated, &text)?;
    log::info!("inserted {} lines into {}", chunk.len(), target.display());
    Ok(())
}

fn list_chunks(config: &ChunkConfig, input: Option<PathBuf>) -> Result<()> {
    let text = read_document(input.as_deref())?;
    let lines = splice::split_lines(&text);
    let scanner = Scanner::with_config(config);

    let mut stdout = io::stdout().lock();
    for chunk in scanner.scan(&lines) {
        let chunk = chunk?;
        let format = chunk.options.format()?.unwrap_or(Format::Text);
        let encoding = chunk.options.encoding()?.unwrap_or_else(|| format.default_encoding());
        writeln!(
            stdout,
            "{}  {}  {}  {}",
            chunk.label, chunk.range, format, encoding
        )?;
    }
    Ok(())
}

fn extract_chunks(
    config: &ChunkConfig,
    input: Option<PathBuf>,
    label: Option<String>,
    directory: &Path,
    no_verify: bool,
) -> Result<()> {
    let text = read_document(input.as_deref())?;
    let lines = splice::split_lines(&text);
    let scanner = Scanner::with_config(config);
    let loader = Loader::with_config(config).with_verify(!no_verify);

    if let Some(label) = label {
        let chunk = scanner
            .find(&lines, &label)?
            .with_context(|| format!("No chunk labeled '{}'", label))?;
        let loaded = loader.load(&chunk)?;
        match &loaded.output_file {
            Some(file) => write_output(directory, file, &loaded.data)?,
            None => io::stdout().lock().write_all(&loaded.data)?,
        }
        return Ok(());
    }

    let mut failures = 0;
    for result in loader.load_document(&lines) {
        match result {
            Ok(loaded) => match &loaded.output_file {
                Some(file) => match write_output(directory, file, &loaded.data) {
                    Ok(()) => log::info!("extracted {} -> {}", loaded.label, file),
                    Err(e) => {
                        eprintln!("Error: chunk '{}': {:#}", loaded.label, e);
                        failures += 1;
                    }
                },
                None => log::info!("chunk '{}' has no output.file, skipped", loaded.label),
            },
            Err(e) => {
                eprintln!("Error: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} chunk(s) failed to extract", failures);
    }
    Ok(())
}

fn write_output(directory: &Path, file: &str, data: &[u8]) -> Result<()> {
    let relative = Path::new(file);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        bail!("Refusing to write output.file outside the target directory: {}", file);
    }
    let path = directory.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, data).with_context(|| format!("Failed to write: {}", path.display()))
}

fn remove_chunks(
    config: &ChunkConfig,
    document: &Path,
    labels: &[String],
    output: Option<PathBuf>,
) -> Result<()> {
    let text = read_document(Some(document))?;
    let lines = splice::split_lines(&text);

    let chunks = Scanner::with_config(config).scan_all(&lines)?;
    let mut ranges: Vec<LineRange> = Vec::new();
    for label in labels {
        let chunk = chunks
            .iter()
            .find(|c| &c.label == label)
            .with_context(|| format!("No chunk labeled '{}'", label))?;
        ranges.push(chunk.range);
    }

    let (updated, first) = splice::remove_ranges(&lines, &ranges)?;
    let target = output.unwrap_or_else(|| document.to_path_buf());
    write_document(&target, &updated, &text)?;
    if let Some(first) = first {
        log::info!("removed {} chunk(s), cursor at line {}", labels.len(), first + 1);
    }
    Ok(())
}
