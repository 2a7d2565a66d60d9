// # Folder Index
//
// In-memory hierarchy built from a flat folder listing. Folders may have
// several parents, so the hierarchy is a DAG; display paths follow the first
// parent only.

use std::collections::HashMap;

use crate::model::FolderRecord;

/// Upper bound on ancestor walks, guards against cycles in remote data
const MAX_DEPTH: usize = 64;

/// An indexed folder with its resolved display path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_ids: Vec<String>,
    /// `/`-separated names from the outermost known ancestor
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct FolderIndex {
    folders: HashMap<String, Folder>,
}

impl FolderIndex {
    /// Build the index and resolve every display path
    pub fn from_records(records: Vec<FolderRecord>) -> Self {
        let mut folders: HashMap<String, Folder> = records
            .into_iter()
            .map(|r| {
                (
                    r.id.clone(),
                    Folder {
                        id: r.id,
                        name: r.name,
                        parent_ids: r.parent_ids,
                        path: String::new(),
                    },
                )
            })
            .collect();

        let paths: Vec<(String, String)> = folders
            .keys()
            .map(|id| (id.clone(), resolve_path(&folders, id)))
            .collect();
        for (id, path) in paths {
            if let Some(folder) = folders.get_mut(&id) {
                folder.path = path;
            }
        }

        Self { folders }
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Folder> {
        self.folders.get(id)
    }

    /// Display path of a folder, if indexed
    pub fn path_for(&self, id: &str) -> Option<&str> {
        self.folders.get(id).map(|f| f.path.as_str())
    }

    /// All indexed folders sorted by path
    pub fn list(&self) -> Vec<&Folder> {
        let mut all: Vec<&Folder> = self.folders.values().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Whether `node` is `ancestor` or lies below it through any parent chain
    ///
    /// Reflexive even for ids missing from the index.
    pub fn is_or_is_contained_in(&self, node: &str, ancestor: &str) -> bool {
        self.contained(node, ancestor, 0)
    }

    /// Whether any of `parent_ids` is, or is contained in, any of `roots`
    pub fn any_is_or_is_contained_in<'a, P, R>(&self, parent_ids: P, roots: R) -> bool
    where
        P: IntoIterator<Item = &'a String>,
        R: IntoIterator<Item = &'a String> + Clone,
    {
        parent_ids.into_iter().any(|parent| {
            roots
                .clone()
                .into_iter()
                .any(|root| self.is_or_is_contained_in(parent, root))
        })
    }

    fn contained(&self, node: &str, ancestor: &str, depth: usize) -> bool {
        if node == ancestor {
            return true;
        }
        if depth >= MAX_DEPTH {
            return false;
        }
        match self.folders.get(node) {
            Some(folder) => folder
                .parent_ids
                .iter()
                .any(|parent| self.contained(parent, ancestor, depth + 1)),
            None => false,
        }
    }
}

fn resolve_path(folders: &HashMap<String, Folder>, id: &str) -> String {
    let mut names = Vec::new();
    let mut current = folders.get(id);
    while let Some(folder) = current {
        if names.len() >= MAX_DEPTH {
            break;
        }
        names.push(folder.name.as_str());
        current = folder.parent_ids.first().and_then(|p| folders.get(p));
    }
    names.reverse();
    names.join("/")
}
