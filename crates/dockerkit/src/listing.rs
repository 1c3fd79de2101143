//! Container listing parser
//!
//! Reads the tabular report of `docker ps`: a header row naming the columns,
//! then one row per container. Columns are located by name, never by
//! position, so any column order works. Rows are either tab-separated or
//! aligned with spaces under their header, in which case each column spans
//! from its header offset to the next header offset.

use crate::error::{Error, Result};
use crate::types::{ContainerRecord, ContainerStatus, ObservedContainerState, PortBinding};

const NAMES: &str = "NAMES";
const CONTAINER_ID: &str = "CONTAINER ID";
const IMAGE: &str = "IMAGE";
const STATUS: &str = "STATUS";
const PORTS: &str = "PORTS";

const REQUIRED: [&str; 5] = [NAMES, CONTAINER_ID, IMAGE, STATUS, PORTS];

/// Column layout derived from the header row.
#[derive(Debug)]
enum Layout {
    Tabs(Vec<String>),
    /// Column name and its character offset in the header
    Aligned(Vec<(String, usize)>),
}

impl Layout {
    fn from_header(header: &str) -> Self {
        if header.contains('\t') {
            return Layout::Tabs(header.split('\t').map(normalize).collect());
        }

        // Column names may contain single spaces (`CONTAINER ID`); columns
        // are separated by two or more
        let chars: Vec<char> = header.chars().collect();
        let mut columns = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == ' ' {
                i += 1;
                continue;
            }
            let start = i;
            while i < chars.len() && !(chars[i] == ' ' && chars.get(i + 1).is_none_or(|c| *c == ' ')) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            columns.push((normalize(&name), start));
        }
        Layout::Aligned(columns)
    }

    fn names(&self) -> Vec<&str> {
        match self {
            Layout::Tabs(names) => names.iter().map(String::as_str).collect(),
            Layout::Aligned(columns) => columns.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }

    /// Cell values of `row`, in header order.
    fn split(&self, row: &str) -> Vec<String> {
        match self {
            Layout::Tabs(_) => row.split('\t').map(|c| c.trim().to_string()).collect(),
            Layout::Aligned(columns) => {
                let chars: Vec<char> = row.chars().collect();
                columns
                    .iter()
                    .enumerate()
                    .map(|(index, (_, start))| {
                        let end = columns
                            .get(index + 1)
                            .map_or(chars.len(), |(_, next)| (*next).min(chars.len()));
                        let start = (*start).min(end);
                        chars[start..end].iter().collect::<String>().trim().to_string()
                    })
                    .collect()
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Parse a container listing report.
///
/// An empty or blank report yields an empty state. A header missing one of
/// `NAMES`, `CONTAINER ID`, `IMAGE`, `STATUS` or `PORTS` is an error; other
/// columns are ignored.
pub fn parse_listing(report: &str) -> Result<ObservedContainerState> {
    let mut lines = report
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(ObservedContainerState::default());
    };

    let layout = Layout::from_header(header);
    let names = layout.names();
    let position = |column: &str| -> Result<usize> {
        names
            .iter()
            .position(|n| *n == column)
            .ok_or_else(|| Error::ListingParse {
                line: 1,
                message: format!("header has no {column} column"),
            })
    };

    let [names_at, id_at, image_at, status_at, ports_at] = [
        position(REQUIRED[0])?,
        position(REQUIRED[1])?,
        position(REQUIRED[2])?,
        position(REQUIRED[3])?,
        position(REQUIRED[4])?,
    ];

    let mut containers = Vec::new();
    for (index, row) in lines {
        let cells = layout.split(row);
        let cell = |at: usize| cells.get(at).map(String::as_str).unwrap_or("");

        let name = cell(names_at);
        if name.is_empty() {
            return Err(Error::ListingParse {
                line: index + 1,
                message: "row has no container name".to_string(),
            });
        }

        containers.push(ContainerRecord {
            // `docker ps` lists every name of a container; the first is canonical
            name: name.split(',').next().unwrap_or(name).trim().to_string(),
            id: cell(id_at).to_string(),
            image: cell(image_at).to_string(),
            status: ContainerStatus::from_report(cell(status_at)),
            ports: PortBinding::parse_list(cell(ports_at)),
        });
    }

    log::trace!("Parsed {} container(s) from listing", containers.len());
    Ok(ObservedContainerState::new(containers))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIGNED: &str = "\
CONTAINER ID   IMAGE          STATUS                     PORTS                  NAMES
4f1c2b3a9d8e   nginx:1.25     Up 2 hours                 0.0.0.0:8080->80/tcp   web
9a8b7c6d5e4f   postgres:16    Exited (0) 3 minutes ago                          db
";

    #[test]
    fn test_empty_report() {
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_header_only() {
        let state =
            parse_listing("CONTAINER ID   IMAGE     STATUS    PORTS     NAMES\n").unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_aligned_rows() {
        let state = parse_listing(ALIGNED).unwrap();
        assert_eq!(state.len(), 2);

        let web = state.by_name("web").unwrap();
        assert_eq!(web.id, "4f1c2b3a9d8e");
        assert_eq!(web.image, "nginx:1.25");
        assert!(web.status.is_running());
        assert_eq!(web.ports[0].host_port, Some(8080));

        let db = state.by_id("9a8b").unwrap();
        assert_eq!(db.name, "db");
        assert_eq!(db.status, ContainerStatus::Exited);
        assert!(db.ports.is_empty());
    }

    #[test]
    fn test_column_order_is_free() {
        let reordered = "\
NAMES   STATUS       IMAGE         PORTS   CONTAINER ID
web     Up 2 hours   nginx:1.25            4f1c2b3a9d8e
";
        let state = parse_listing(reordered).unwrap();
        let web = state.by_name("web").unwrap();
        assert_eq!(web.id, "4f1c2b3a9d8e");
        assert_eq!(web.image, "nginx:1.25");
        assert!(web.status.is_running());
    }

    #[test]
    fn test_tab_separated_rows() {
        let report = "names\tcontainer id\timage\tstatus\tports\textra\n\
                      web\tabc\tnginx\tUp 1 second\t\tignored\n";
        let state = parse_listing(report).unwrap();
        let web = state.by_name("web").unwrap();
        assert_eq!(web.id, "abc");
        assert!(web.ports.is_empty());
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let err = parse_listing("CONTAINER ID   IMAGE   NAMES\nabc   nginx   web\n").unwrap_err();
        assert!(matches!(err, Error::ListingParse { line: 1, .. }));
    }
}
