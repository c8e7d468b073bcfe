use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// LDP interaction model of a stored resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionModel {
    BasicContainer,
    DirectContainer,
    IndirectContainer,
    /// A binary.
    NonRdfSource,
    /// The RDF description attached to a binary.
    NonRdfSourceDescription,
    Acl,
}

impl InteractionModel {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::BasicContainer | Self::DirectContainer | Self::IndirectContainer
        )
    }

    /// Containers whose children generate membership triples.
    pub fn is_membership_container(&self) -> bool {
        matches!(self, Self::DirectContainer | Self::IndirectContainer)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::NonRdfSource)
    }

    /// Everything except binaries carries an RDF graph.
    pub fn is_rdf(&self) -> bool {
        !self.is_binary()
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::BasicContainer => "http://www.w3.org/ns/ldp#BasicContainer",
            Self::DirectContainer => "http://www.w3.org/ns/ldp#DirectContainer",
            Self::IndirectContainer => "http://www.w3.org/ns/ldp#IndirectContainer",
            Self::NonRdfSource => "http://www.w3.org/ns/ldp#NonRDFSource",
            Self::NonRdfSourceDescription => "http://fedora.info/definitions/v4/repository#NonRdfSourceDescription",
            Self::Acl => "http://fedora.info/definitions/v4/webac#Acl",
        }
    }
}

impl FromStr for InteractionModel {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::BasicContainer,
            Self::DirectContainer,
            Self::IndirectContainer,
            Self::NonRdfSource,
            Self::NonRdfSourceDescription,
            Self::Acl,
        ]
        .into_iter()
        .find(|model| model.uri() == s)
        .ok_or_else(|| TypeError::UnknownInteractionModel(s.to_string()))
    }
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}
