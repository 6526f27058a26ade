use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{HrmOmeroError, MalformedReason};

/// Group id meaning "no group" / "all groups visible to the user".
pub const ALL_GROUPS: i64 = -1;

const ROOT_ID: &str = "ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Image,
    Dataset,
    Project,
    Experimenter,
    ExperimenterGroup,
    /// Virtual root of the tree, only reachable through `ROOT`.
    BaseTree,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Image => "Image",
            ObjectType::Dataset => "Dataset",
            ObjectType::Project => "Project",
            ObjectType::Experimenter => "Experimenter",
            ObjectType::ExperimenterGroup => "ExperimenterGroup",
            ObjectType::BaseTree => "BaseTree",
        }
    }

    fn from_id_field(value: &str) -> Option<Self> {
        match value {
            "Image" => Some(ObjectType::Image),
            "Dataset" => Some(ObjectType::Dataset),
            "Project" => Some(ObjectType::Project),
            "Experimenter" => Some(ObjectType::Experimenter),
            "ExperimenterGroup" => Some(ObjectType::ExperimenterGroup),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A group-qualified OMERO object id, e.g. `G:23:Image:42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OmeroId {
    group: i64,
    object_type: ObjectType,
    object_id: i64,
}

impl OmeroId {
    pub fn root() -> Self {
        Self {
            group: ALL_GROUPS,
            object_type: ObjectType::BaseTree,
            object_id: -1,
        }
    }

    /// Builds an id from its parts, applying the same checks as parsing.
    pub fn new(group: i64, object_type: ObjectType, object_id: i64) -> Result<Self, HrmOmeroError> {
        let malformed = |reason| HrmOmeroError::MalformedIdentifier {
            input: format!("G:{group}:{object_type}:{object_id}"),
            reason,
        };
        if object_type == ObjectType::BaseTree {
            return Err(malformed(MalformedReason::UnknownObjectType));
        }
        if object_id < 1 {
            return Err(malformed(MalformedReason::ObjectIdBelowOne));
        }
        Ok(Self {
            group,
            object_type,
            object_id,
        })
    }

    pub fn group(&self) -> i64 {
        self.group
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    pub fn is_root(&self) -> bool {
        self.object_type == ObjectType::BaseTree
    }

}

impl fmt::Display for OmeroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G:{}:{}:{}", self.group, self.object_type, self.object_id)
    }
}

impl Serialize for OmeroId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for OmeroId {
    type Err = HrmOmeroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == ROOT_ID {
            let id = OmeroId::root();
            tracing::debug!("Converted special ID 'ROOT' to [{id}].");
            return Ok(id);
        }

        let malformed = |reason| HrmOmeroError::MalformedIdentifier {
            input: value.to_string(),
            reason,
        };

        let fields = value.split(':').collect::<Vec<_>>();
        let [prefix, group, object_type, object_id] = fields.as_slice() else {
            return Err(malformed(MalformedReason::FieldCount(fields.len())));
        };
        if *prefix != "G" {
            return Err(malformed(MalformedReason::GroupPrefix));
        }
        let group =
            canonical_int(group).ok_or_else(|| malformed(MalformedReason::GroupNotInteger))?;
        let object_id =
            canonical_int(object_id).ok_or_else(|| malformed(MalformedReason::ObjectIdNotInteger))?;
        let object_type = ObjectType::from_id_field(object_type)
            .ok_or_else(|| malformed(MalformedReason::UnknownObjectType))?;
        if object_id < 1 {
            return Err(malformed(MalformedReason::ObjectIdBelowOne));
        }

        tracing::trace!("Validated ID string: group={group}, {object_type}={object_id}");
        Ok(Self {
            group,
            object_type,
            object_id,
        })
    }
}

/// Integer field in the form `Display` writes back, so ids round-trip exactly.
fn canonical_int(field: &str) -> Option<i64> {
    let value = field.parse::<i64>().ok()?;
    (value.to_string() == field).then_some(value)
}
