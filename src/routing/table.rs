use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A concrete connection target. Compared and hashed by name.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct PhysicDataSource {
    name: String,
}

impl PhysicDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for PhysicDataSource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for PhysicDataSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for PhysicDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One resolved physical table reachable for a shard-key value or range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteTable {
    pub name: String,
    pub data_source: PhysicDataSource,
}

impl RouteTable {
    pub fn new(name: impl Into<String>, data_source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_source: PhysicDataSource::new(data_source),
        }
    }
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.name)
    }
}

/// A concrete table within a data source, as used by plans.
///
/// Two tables are the same table when their names match.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct PhysicTable {
    name: String,
    data_source: PhysicDataSource,
}

impl PhysicTable {
    pub fn new(name: impl Into<String>, data_source: PhysicDataSource) -> Self {
        Self {
            name: name.into(),
            data_source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_source(&self) -> &PhysicDataSource {
        &self.data_source
    }
}

impl From<RouteTable> for PhysicTable {
    fn from(route: RouteTable) -> Self {
        Self::new(route.name, route.data_source)
    }
}

impl From<&RouteTable> for PhysicTable {
    fn from(route: &RouteTable) -> Self {
        Self::new(route.name.clone(), route.data_source.clone())
    }
}

impl PartialEq for PhysicTable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for PhysicTable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for PhysicTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.name)
    }
}

/// Groups tables by owning data source, keeping first-seen order for both
/// data sources and the tables inside each group.
pub fn group_tables<'a, I>(tables: I) -> Vec<(PhysicDataSource, Vec<PhysicTable>)>
where
    I: IntoIterator<Item = &'a PhysicTable>,
{
    let mut groups: Vec<(PhysicDataSource, Vec<PhysicTable>)> = Vec::new();
    for table in tables {
        match groups.iter_mut().find(|(ds, _)| ds == table.data_source()) {
            Some((_, group)) => {
                if !group.contains(table) {
                    group.push(table.clone());
                }
            }
            None => groups.push((table.data_source().clone(), vec![table.clone()])),
        }
    }
    groups
}
