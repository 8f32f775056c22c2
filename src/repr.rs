// SPDX-License-Identifier: Apache-2.0

//! Representation kinds: the nodes of the translation graph.
//!
//! A kind is identified structurally by its language plus the translator that
//! produced it. Two tools that both emit Verilog netlists yield two distinct
//! kinds (`netlist@yosys` vs `netlist@vivado`) since their outputs are not
//! assumed interchangeable.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Target language of a circuit artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Verilog,
    SystemVerilog,
    /// Structural Verilog netlist as emitted by a synthesizer.
    Netlist,
    /// Simulation-model source, e.g. C++ emitted by a Verilog compiler.
    CppModel,
    /// SMT-LIB2 formula text.
    Smt2,
    /// ASCII AIGER (`aag`) logical form.
    Aiger,
    Btor2,
    /// Tool-specific JSON netlist.
    Json,
    Other(String),
}

impl Language {
    pub fn extension(&self) -> &str {
        match self {
            Language::Verilog | Language::Netlist => "v",
            Language::SystemVerilog => "sv",
            Language::CppModel => "cpp",
            Language::Smt2 => "smt2",
            Language::Aiger => "aag",
            Language::Btor2 => "btor2",
            Language::Json => "json",
            Language::Other(_) => "txt",
        }
    }

    /// Whether the language is HDL source text that the mutation engine can
    /// parse.
    pub fn is_hdl_source(&self) -> bool {
        matches!(self, Language::Verilog | Language::SystemVerilog)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Verilog => write!(f, "verilog"),
            Language::SystemVerilog => write!(f, "systemverilog"),
            Language::Netlist => write!(f, "netlist"),
            Language::CppModel => write!(f, "cpp"),
            Language::Smt2 => write!(f, "smt2"),
            Language::Aiger => write!(f, "aiger"),
            Language::Btor2 => write!(f, "btor2"),
            Language::Json => write!(f, "json"),
            Language::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty language name".to_string());
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid language name: {:?}", s));
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "verilog" | "v" => Language::Verilog,
            "systemverilog" | "sv" => Language::SystemVerilog,
            "netlist" => Language::Netlist,
            "cpp" | "c++" => Language::CppModel,
            "smt2" | "smt" => Language::Smt2,
            "aiger" | "aag" | "logical-form" => Language::Aiger,
            "btor2" | "btor" => Language::Btor2,
            "json" => Language::Json,
            other => Language::Other(other.to_string()),
        })
    }
}

/// Immutable tag identifying what a circuit artifact is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepresentationKind {
    language: Language,
    producer: Option<String>,
}

impl RepresentationKind {
    /// A source kind: not produced by any translator.
    pub fn source(language: Language) -> Self {
        RepresentationKind {
            language,
            producer: None,
        }
    }

    pub fn produced(language: Language, producer: &str) -> Self {
        RepresentationKind {
            language,
            producer: Some(producer.to_string()),
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn producer(&self) -> Option<&str> {
        self.producer.as_deref()
    }

    pub fn extension(&self) -> &str {
        self.language.extension()
    }
}

impl fmt::Display for RepresentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.producer {
            Some(producer) => write!(f, "{}@{}", self.language, producer),
            None => write!(f, "{}", self.language),
        }
    }
}

impl FromStr for RepresentationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((language, producer)) => {
                if producer.is_empty() {
                    return Err(format!("empty producer in kind: {:?}", s));
                }
                Ok(RepresentationKind::produced(language.parse()?, producer))
            }
            None => Ok(RepresentationKind::source(s.parse()?)),
        }
    }
}

impl Serialize for RepresentationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RepresentationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Pattern naming one or more sink kinds.
///
/// `netlist@yosys` selects exactly that kind while `netlist` selects every
/// kind of the netlist language, whichever tool produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KindSelector {
    Exact(RepresentationKind),
    Language(Language),
}

impl KindSelector {
    pub fn matches(&self, kind: &RepresentationKind) -> bool {
        match self {
            KindSelector::Exact(k) => k == kind,
            KindSelector::Language(language) => kind.language() == language,
        }
    }
}

impl fmt::Display for KindSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindSelector::Exact(k) => write!(f, "{}", k),
            KindSelector::Language(language) => write!(f, "{}", language),
        }
    }
}

impl FromStr for KindSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('@') {
            Ok(KindSelector::Exact(s.parse()?))
        } else {
            Ok(KindSelector::Language(s.parse()?))
        }
    }
}

/// The set of kinds declared for one process run.
#[derive(Debug, Clone, Default)]
pub struct RepresentationRegistry {
    kinds: BTreeSet<RepresentationKind>,
}

impl RepresentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `kind`; returns false if it was already present.
    pub fn declare(&mut self, kind: RepresentationKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn contains(&self, kind: &RepresentationKind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn lookup(&self, name: &str) -> Option<&RepresentationKind> {
        let wanted: RepresentationKind = name.parse().ok()?;
        self.kinds.get(&wanted)
    }

    /// All declared kinds matched by `selector`, in stable order.
    pub fn resolve(&self, selector: &KindSelector) -> Vec<&RepresentationKind> {
        self.kinds.iter().filter(|k| selector.matches(k)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepresentationKind> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
