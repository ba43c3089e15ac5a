//! The fixed, closed set of image classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Label of a stored image
///
/// Serialized by name (e.g. `"PieChart"`); the integer code is what ends up in `Y`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Class {
    Unlabeled,
    NotGraph,
    VennDiagram,
    TreeDiagram,
    Table,
    ScatterGraph,
    RadarPlot,
    PieChart,
    ParetoChart,
    NetworkDiagram,
    Map,
    LineGraph,
    FlowChart,
    ColumnGraph,
    BubbleChart,
    BoxPlot,
    BarGraph,
    AreaGraph,
}

impl Class {
    /// Label given to imported images without an explicit one
    pub const DEFAULT: Class = Class::Unlabeled;

    pub const ALL: [Class; 18] = [
        Class::Unlabeled,
        Class::NotGraph,
        Class::VennDiagram,
        Class::TreeDiagram,
        Class::Table,
        Class::ScatterGraph,
        Class::RadarPlot,
        Class::PieChart,
        Class::ParetoChart,
        Class::NetworkDiagram,
        Class::Map,
        Class::LineGraph,
        Class::FlowChart,
        Class::ColumnGraph,
        Class::BubbleChart,
        Class::BoxPlot,
        Class::BarGraph,
        Class::AreaGraph,
    ];

    /// Multi-class integer code (`Unlabeled` is -1, `NotGraph` is 0)
    pub fn code(self) -> i64 {
        match self {
            Class::Unlabeled => -1,
            Class::NotGraph => 0,
            Class::VennDiagram => 1,
            Class::TreeDiagram => 2,
            Class::Table => 3,
            Class::ScatterGraph => 4,
            Class::RadarPlot => 5,
            Class::PieChart => 6,
            Class::ParetoChart => 7,
            Class::NetworkDiagram => 8,
            Class::Map => 9,
            Class::LineGraph => 10,
            Class::FlowChart => 11,
            Class::ColumnGraph => 12,
            Class::BubbleChart => 13,
            Class::BoxPlot => 14,
            Class::BarGraph => 15,
            Class::AreaGraph => 16,
        }
    }

    /// Binary graph / not-graph code: `NotGraph` is 0, every other class is 1
    pub fn bundled_code(self) -> i64 {
        match self {
            Class::NotGraph => 0,
            _ => 1,
        }
    }

    /// Code used in `Y` for the given bundling choice
    pub fn label_code(self, bundled: bool) -> i64 {
        if bundled {
            self.bundled_code()
        } else {
            self.code()
        }
    }

    pub fn from_code(code: i64) -> Option<Class> {
        Class::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Class::Unlabeled => "Unlabeled",
            Class::NotGraph => "NotGraph",
            Class::VennDiagram => "VennDiagram",
            Class::TreeDiagram => "TreeDiagram",
            Class::Table => "Table",
            Class::ScatterGraph => "ScatterGraph",
            Class::RadarPlot => "RadarPlot",
            Class::PieChart => "PieChart",
            Class::ParetoChart => "ParetoChart",
            Class::NetworkDiagram => "NetworkDiagram",
            Class::Map => "Map",
            Class::LineGraph => "LineGraph",
            Class::FlowChart => "FlowChart",
            Class::ColumnGraph => "ColumnGraph",
            Class::BubbleChart => "BubbleChart",
            Class::BoxPlot => "BoxPlot",
            Class::BarGraph => "BarGraph",
            Class::AreaGraph => "AreaGraph",
        }
    }
}

impl Default for Class {
    fn default() -> Self {
        Class::DEFAULT
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Class {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Class::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::UnknownClass(s.to_string()))
    }
}
