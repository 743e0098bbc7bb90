use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xmlpager::pagination::{index_file, PageIndex};
use xmlpager::{
    CancelToken, Document, FormatOptions, ProgressSink, SearchDirection, SearchMode, SearchQuery,
    Settings, XmlStreamFormatter,
};

#[derive(Parser)]
#[command(name = "xmlpager", about = "Paged XML viewing, search and formatting")]
struct Cli {
    /// Settings file (JSON); defaults are used if absent.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reformat an XML file.
    Format {
        path: PathBuf,
        /// Strip inter-tag whitespace instead of pretty-printing.
        #[arg(long)]
        ugly: bool,
        /// Spaces per nesting level when pretty-printing.
        #[arg(long, default_value_t = 2)]
        indent: usize,
        /// Rewrite the file in place instead of printing to stdout.
        #[arg(long)]
        in_place: bool,
    },
    /// Search a file, printing absolute character offsets of matches.
    Search {
        path: PathBuf,
        pattern: String,
        /// normal, extended (backslash escapes) or regex.
        #[arg(long, default_value = "normal")]
        mode: String,
        #[arg(long)]
        ignore_case: bool,
        /// Search backwards from the end of the file.
        #[arg(long)]
        backwards: bool,
        /// Stop after the first match.
        #[arg(long)]
        first: bool,
    },
    /// Print the page table a file would be split into.
    Index {
        path: PathBuf,
        /// Characters per page; overrides the settings file.
        #[arg(long)]
        page_size: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::load_or_default(path),
        None => Settings::default(),
    };

    match cli.command {
        Command::Format {
            path,
            ugly,
            indent,
            in_place,
        } => cmd_format(&path, ugly, indent, in_place),
        Command::Search {
            path,
            pattern,
            mode,
            ignore_case,
            backwards,
            first,
        } => cmd_search(&path, &pattern, &mode, ignore_case, backwards, first, settings),
        Command::Index { path, page_size } => {
            cmd_index(&path, page_size.unwrap_or(settings.page_size))
        }
    }
}

fn cmd_format(path: &PathBuf, ugly: bool, indent: usize, in_place: bool) -> anyhow::Result<()> {
    let options = if ugly {
        FormatOptions::ugly()
    } else {
        FormatOptions::pretty(indent)
    };
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let cancel = CancelToken::new();

    if in_place {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        XmlStreamFormatter::new(options, &file, &mut tmp).run(&cancel)?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("cannot replace {}", path.display()))?;
    } else {
        let stdout = std::io::stdout().lock();
        let mut out = BufWriter::new(stdout);
        XmlStreamFormatter::new(options, &file, &mut out).run(&cancel)?;
        out.flush()?;
    }
    Ok(())
}

fn cmd_search(
    path: &PathBuf,
    pattern: &str,
    mode: &str,
    ignore_case: bool,
    backwards: bool,
    first: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let mode = match mode {
        "normal" => SearchMode::Normal,
        "extended" => SearchMode::Extended,
        "regex" => SearchMode::Regex,
        other => bail!("unknown search mode '{other}' (normal, extended, regex)"),
    };
    let direction = if backwards {
        SearchDirection::Up
    } else {
        SearchDirection::Down
    };
    let query = SearchQuery::new(pattern, mode)
        .direction(direction)
        .ignore_case(ignore_case);

    let mut doc = Document::open(path, settings)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let cancel = CancelToken::new();
    let progress = ProgressSink::disabled();

    let mut offset = if backwards { usize::MAX } else { 0 };
    let mut found_any = false;
    loop {
        let find = match doc.find_next_with(&query, offset, &progress, &cancel)? {
            Some(find) => find,
            None => break,
        };
        println!("{}\t{}", find.start, find.end);
        found_any = true;
        if first {
            break;
        }
        if backwards {
            if find.start == 0 {
                break;
            }
            offset = find.start - 1;
        } else {
            offset = find.end.max(find.start + 1);
        }
    }
    if !found_any {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_index(path: &PathBuf, page_size: usize) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let index: PageIndex = index_file(
        &file,
        page_size,
        &ProgressSink::disabled(),
        &CancelToken::new(),
    )?;

    println!("page size: {} chars", index.page_size());
    println!("total bytes: {}", index.total_bytes());
    println!("pages: {}", index.page_count());
    println!("page\tbyte offset\tlines\tfirst line");
    let offsets = index.byte_offsets();
    let lines = index.line_counts();
    let starts = index.starting_line_counts();
    for i in 0..index.page_count() {
        println!(
            "{}\t{}\t{}\t{}",
            i + 1,
            offsets[i],
            lines[i],
            starts[i] + 1
        );
    }
    Ok(())
}
