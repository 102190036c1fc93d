use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use tablestream::MemoryBackend;

/// Loads a tablestream produced by a writer into a columnar store.
#[derive(Parser, Serialize, Debug, Clone)]
#[command(name = "tablestream-load")]
#[command(version)]
#[command(about = "Columnar table-stream loader")]
#[command(long_about = None)]
pub(crate) struct CliArgs {
    /// Additional directories to search for schema include files. Can
    /// specify multiple paths separated by ':'.
    #[arg(short = 'I', long = "include", value_name = "PATHS")]
    pub include: Vec<String>,

    /// Schema file to parse in addition to the one named in the stream.
    #[arg(short = 'S', long = "schema", value_name = "FILE")]
    pub schema: Vec<String>,

    /// Database name to use, overriding the stream's remote path.
    #[arg(short = 'T', long = "target", value_name = "DB")]
    pub target: Option<String>,

    /// enable debug mode
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,

    /// Stream file to load; stdin when absent.
    pub stream: Option<PathBuf>,
}

impl CliArgs {
    /// Include options accept colon-separated lists.
    pub fn include_paths(&self) -> Vec<String> {
        self.include
            .iter()
            .flat_map(|p| p.split(':'))
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LoadSummary {
    pub database: String,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

impl LoadSummary {
    pub fn from_backend(database: &str, backend: &MemoryBackend) -> Self {
        LoadSummary {
            database: database.to_string(),
            tables: backend
                .tables
                .iter()
                .map(|t| TableSummary {
                    name: t.name.clone(),
                    columns: t.columns.iter().map(|c| c.name.clone()).collect(),
                    rows: t.columns.iter().map(|c| c.rows.len()).max().unwrap_or(0),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn include_paths_split_on_colon() {
        let args = CliArgs::parse_from([
            "tablestream-load",
            "-I",
            "a:b",
            "--include",
            "c",
            "-T",
            "db",
        ]);
        assert_eq!(args.include_paths(), vec!["a", "b", "c"]);
        assert_eq!(args.target.as_deref(), Some("db"));
    }
}
