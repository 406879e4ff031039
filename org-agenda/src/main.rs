use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use org_agenda::agenda::{AgendaViewConfig, GroupBy, MAX_VIEW_DAYS, SortBy, ViewType};
use org_agenda::config::{Settings, load_settings};
use org_agenda::core::{FileIndex, HeadlineNode, Priority, TodoKeywords};
use org_agenda::parser::{OrgDocument, parse_org_file};
use org_agenda::todo::TodoListOptions;
use org_agenda::walker::headlines;
use org_agenda::{format_agenda_view, format_todo_list, generate_agenda_view, generate_todo_list};

#[derive(Debug, Parser)]
#[command(
    name = "org-agenda",
    about = "Agenda views and TODO lists from Org files",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON settings file (TODO keywords, default view, grouping, sorting).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a dated agenda view from one or more Org files.
    Agenda(AgendaArgs),

    /// List every TODO headline, grouped by state and priority.
    Todo(TodoArgs),

    /// Parse Org files and print their headline outline.
    Parse(ParseArgs),
}

#[derive(Debug, Args)]
struct AgendaArgs {
    /// Org files or directories containing Org files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// First day of the agenda (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Number of days to show. Overrides --view.
    #[arg(long)]
    days: Option<u32>,
    /// Preset span: day, week, fortnight, month.
    #[arg(long)]
    view: Option<ViewType>,
    /// Reference date for deadlines and labels (YYYY-MM-DD). Defaults to the local date.
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Only keep items in these TODO states.
    #[arg(long = "todo-state")]
    todo_states: Vec<String>,
    /// Only keep items carrying at least one of these tags.
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Drop items carrying any of these tags.
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,
    /// Only keep items with one of these priorities.
    #[arg(long = "priority")]
    priorities: Vec<char>,
    /// Only keep items in these categories.
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Hide items tagged HABIT.
    #[arg(long)]
    hide_habits: bool,
    /// Hide items in a done state.
    #[arg(long)]
    hide_done: bool,
    /// Order within each group: time, priority, category, todo.
    #[arg(long)]
    sort_by: Option<SortBy>,
    /// Grouping: date, category, todo, priority, tag.
    #[arg(long)]
    group_by: Option<GroupBy>,
    /// Emit JSON instead of the text agenda.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TodoArgs {
    /// Org files or directories containing Org files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Only list these TODO states.
    #[arg(long = "state")]
    states: Vec<String>,
    /// Only list headlines carrying at least one of these tags.
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Leave out headlines in a done state.
    #[arg(long)]
    exclude_done: bool,
    /// Reference date for deadline distances (YYYY-MM-DD).
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Emit JSON instead of the text list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Org files or directories containing Org files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of an outline.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = match &cli.config {
        Some(path) => load_settings(path).with_context(|| format!("loading {:?}", path))?,
        None => Settings::default(),
    };
    match cli.command {
        Commands::Agenda(args) => handle_agenda(args, &settings),
        Commands::Todo(args) => handle_todo(args, &settings),
        Commands::Parse(args) => handle_parse(args, &settings),
    }
}

/// Parsed inputs merged into one forest, file index and TODO vocabulary.
struct Loaded {
    forest: Vec<HeadlineNode>,
    files: FileIndex,
    todo_keywords: TodoKeywords,
}

fn load_documents(inputs: &[PathBuf], base: &TodoKeywords) -> Result<Vec<OrgDocument>> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }
    let mut docs = Vec::with_capacity(expanded.len());
    for input in expanded {
        debug!("parsing {:?}", input);
        let doc = parse_org_file(&input, base).with_context(|| format!("parsing {:?}", input))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn load_forest(inputs: &[PathBuf], base: &TodoKeywords) -> Result<Loaded> {
    let docs = load_documents(inputs, base)?;
    let mut loaded = Loaded {
        forest: Vec::new(),
        files: FileIndex::default(),
        todo_keywords: base.clone(),
    };
    for doc in docs {
        doc.register(&mut loaded.files);
        loaded.todo_keywords.merge(&doc.todo_keywords);
        loaded.forest.extend(doc.headlines);
    }
    info!(
        "loaded {} top-level headlines, {} indexed",
        loaded.forest.len(),
        loaded.files.len()
    );
    Ok(loaded)
}

/// Explicit days win over a preset; command line wins over settings.
fn resolve_days(args: &AgendaArgs, settings: &Settings, start: NaiveDate) -> Result<u32> {
    let days = args
        .days
        .or_else(|| args.view.map(|v| v.days_from(start)))
        .or(settings.days)
        .or_else(|| settings.view.map(|v| v.days_from(start)))
        .unwrap_or(7);
    if days == 0 || days > MAX_VIEW_DAYS {
        anyhow::bail!("--days must be between 1 and {MAX_VIEW_DAYS}");
    }
    Ok(days)
}

fn some_if_any<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

fn handle_agenda(args: AgendaArgs, settings: &Settings) -> Result<()> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let start = args.start.unwrap_or(today);
    let days = resolve_days(&args, settings, start)?;
    let loaded = load_forest(&args.inputs, &settings.todo_keywords)?;

    let config = AgendaViewConfig {
        view_type: args.view.or(settings.view),
        todo_states: some_if_any(args.todo_states),
        include_tags: some_if_any(args.tags),
        exclude_tags: some_if_any(args.exclude_tags),
        priorities: some_if_any(args.priorities.into_iter().map(Priority).collect()),
        categories: some_if_any(args.categories),
        show_habits: !args.hide_habits,
        show_done: !args.hide_done,
        sort_by: args.sort_by.or(settings.sort_by),
        group_by: args.group_by.or(settings.group_by).unwrap_or_default(),
        todo_keywords: loaded.todo_keywords.clone(),
        ..AgendaViewConfig::new(start, days)
    };

    let view = generate_agenda_view(&loaded.forest, &loaded.files, &config, today);
    if args.json {
        let json = serde_json::to_string_pretty(&view)?;
        println!("{json}");
    } else {
        print!("{}", format_agenda_view(&view));
    }
    Ok(())
}

fn handle_todo(args: TodoArgs, settings: &Settings) -> Result<()> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let loaded = load_forest(&args.inputs, &settings.todo_keywords)?;
    let options = TodoListOptions {
        states: some_if_any(args.states),
        tags: some_if_any(args.tags),
        exclude_done: args.exclude_done,
        todo_keywords: loaded.todo_keywords.clone(),
    };

    let list = generate_todo_list(&loaded.forest, &loaded.files, &options, today);
    if args.json {
        let json = serde_json::to_string_pretty(&list)?;
        println!("{json}");
    } else {
        print!("{}", format_todo_list(&list));
    }
    Ok(())
}

fn handle_parse(args: ParseArgs, settings: &Settings) -> Result<()> {
    let docs = load_documents(&args.inputs, &settings.todo_keywords)?;
    if args.json {
        let json = serde_json::to_string_pretty(&docs)?;
        println!("{json}");
        return Ok(());
    }
    for doc in &docs {
        if let Some(path) = &doc.path {
            println!("{}", path.display());
        }
        for h in headlines(&doc.headlines) {
            println!("  {:>4}  {}", h.line_number, outline_row(h));
        }
    }
    Ok(())
}

fn outline_row(h: &HeadlineNode) -> String {
    let mut parts = Vec::new();
    if let Some(state) = &h.todo_state {
        parts.push(state.clone());
    }
    if let Some(p) = h.priority {
        parts.push(format!("[#{p}]"));
    }
    parts.push(h.title.clone());
    if !h.tags.is_empty() {
        parts.push(format!(":{}:", h.tags.join(":")));
    }
    parts.join(" ")
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!("scanning directory {:?}", canonical);
            for file in collect_org_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_org_file(&canonical) {
                anyhow::bail!("{:?} is not an .org file", canonical);
            }
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn is_org_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "org")
}

fn collect_org_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_org_file(&canonical) {
        debug!("found org file {:?}", canonical);
        out.push(canonical);
    }
    Ok(())
}
