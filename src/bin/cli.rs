//! Demo binary: materializes a call graph through the engine and prints the
//! resulting tree (or flat list) with duplicate rows flagged.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use arbor::{
    Config, DataRole, EntityId, GeneratedItem, ItemGenerator, ItemStream, ListModel, ModelIndex,
    TreeModel,
};
use clap::Parser;
use nu_ansi_term::Color;
use rustc_hash::FxHashMap;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "arbor",
    version,
    about = "Materialize a call graph through the arbor engine",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        value_name = "FILE",
        help = "Edge list: one 'caller callee' pair per line, '#' comments. \
                Omit to use the built-in demo graph"
    )]
    edges: Option<PathBuf>,

    #[arg(long, default_value_t = 3, help = "Eager expansion depth after install")]
    depth: u32,

    #[arg(long, help = "Flat list of roots instead of a tree")]
    list: bool,

    #[arg(long, default_value_t = 4, help = "Expansion worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 10, help = "Give up after this many seconds")]
    timeout_secs: u64,
}

/// In-memory call graph serving as the item generator.
struct CallGraph {
    names: Vec<String>,
    roots: Vec<usize>,
    callees: FxHashMap<usize, Vec<usize>>,
    depth: u32,
}

impl CallGraph {
    fn demo(depth: u32) -> Self {
        let mut graph = GraphBuilder::default();
        graph.edge("main", "parse_args");
        graph.edge("main", "run");
        graph.edge("run", "load_index");
        graph.edge("run", "render");
        graph.edge("render", "render");
        graph.edge("render", "load_index");
        graph.edge("load_index", "read_file");
        graph.build(depth)
    }

    fn from_edges(text: &str, depth: u32) -> Self {
        let mut graph = GraphBuilder::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            if let (Some(caller), Some(callee)) = (parts.next(), parts.next()) {
                graph.edge(caller, callee);
            }
        }
        graph.build(depth)
    }

    fn item(&self, id: usize) -> GeneratedItem {
        let callees = self.callees.get(&id).map(Vec::len).unwrap_or(0);
        GeneratedItem::new(EntityId(id as u64 + 1))
            .with_cell(self.names[id].as_str())
            .with_cell(format!("{callees} callees"))
    }
}

impl ItemGenerator for CallGraph {
    fn column_count(&self) -> usize {
        2
    }

    fn column_title(&self, column: usize) -> String {
        match column {
            0 => "Function".to_string(),
            _ => "Callees".to_string(),
        }
    }

    fn roots(&self) -> ItemStream {
        let items: Vec<GeneratedItem> = self.roots.iter().map(|&id| self.item(id)).collect();
        Box::new(items.into_iter())
    }

    fn children(&self, parent: &GeneratedItem) -> ItemStream {
        let id = match parent.entity {
            Some(EntityId(raw)) if raw > 0 => (raw - 1) as usize,
            _ => return Box::new(std::iter::empty()),
        };
        let items: Vec<GeneratedItem> = self
            .callees
            .get(&id)
            .map(|callees| callees.iter().map(|&callee| self.item(callee)).collect())
            .unwrap_or_default();
        Box::new(items.into_iter())
    }

    fn initial_depth(&self) -> u32 {
        self.depth
    }
}

#[derive(Default)]
struct GraphBuilder {
    names: Vec<String>,
    ids: FxHashMap<String, usize>,
    callees: FxHashMap<usize, Vec<usize>>,
    called: FxHashMap<usize, usize>,
}

impl GraphBuilder {
    fn id(&mut self, name: &str) -> usize {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    fn edge(&mut self, caller: &str, callee: &str) {
        let caller = self.id(caller);
        let callee = self.id(callee);
        self.callees.entry(caller).or_default().push(callee);
        *self.called.entry(callee).or_default() += 1;
    }

    fn build(self, depth: u32) -> CallGraph {
        let mut roots: Vec<usize> = (0..self.names.len())
            .filter(|id| !self.called.contains_key(id))
            .collect();
        if roots.is_empty() && !self.names.is_empty() {
            roots.push(0);
        }
        CallGraph {
            names: self.names,
            roots,
            callees: self.callees,
            depth,
        }
    }
}

fn print_tree(model: &TreeModel, parent: Option<ModelIndex>, indent: usize) {
    let rows = model.row_count(parent).unwrap_or(0);
    for row in 0..rows {
        let Ok(index) = model.index(row, 0, parent) else {
            continue;
        };
        let name = model
            .data(index, DataRole::Display)
            .ok()
            .and_then(|value| value.as_text().map(str::to_string))
            .unwrap_or_default();
        let duplicate = model
            .data(index, DataRole::IsDuplicate)
            .ok()
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        let pad = "  ".repeat(indent);
        if duplicate {
            println!(
                "{pad}{} {}",
                Color::DarkGray.paint(&name),
                Color::DarkGray.italic().paint("(duplicate, see original)")
            );
        } else {
            println!("{pad}{}", Color::Cyan.paint(&name));
            print_tree(model, Some(index), indent + 1);
        }
    }
}

fn print_list(model: &mut ListModel) {
    for row in 0..model.len() {
        let name = model
            .cell(row, 0, DataRole::Display)
            .ok()
            .and_then(|value| value.as_text().map(str::to_string))
            .unwrap_or_default();
        match model.original_row(row) {
            Ok(Some(original)) => println!(
                "{:>4}  {} {}",
                row,
                Color::DarkGray.paint(&name),
                Color::DarkGray.paint(format!("(duplicate of row {original})"))
            ),
            _ => println!("{:>4}  {}", row, Color::Cyan.paint(&name)),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let generator: Arc<dyn ItemGenerator> = match &cli.edges {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Arc::new(CallGraph::from_edges(&text, cli.depth)),
            Err(err) => {
                eprintln!("failed to read {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(CallGraph::demo(cli.depth)),
    };

    let config = Config {
        worker_threads: cli.threads,
        ..Config::default()
    };
    let timeout = Duration::from_secs(cli.timeout_secs);

    if cli.list {
        let mut model = ListModel::new(config);
        model.install_generator(generator);
        if !model.run_until_idle(timeout) {
            eprintln!("generator did not finish within {timeout:?}");
            return ExitCode::FAILURE;
        }
        print_list(&mut model);
    } else {
        let mut model = TreeModel::new(config);
        model.install_generator(generator);
        if !model.run_until_idle(timeout) {
            eprintln!("generator did not finish within {timeout:?}");
            return ExitCode::FAILURE;
        }
        print_tree(&model, None, 0);
    }
    ExitCode::SUCCESS
}
