use serde::Serialize;

use crate::domain::{ObjectType, OmeroId};
use crate::error::HrmOmeroError;
use crate::gateway::{OmeroGateway, RemoteObject};
use crate::guard::with_session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NodeOwner {
    Login(String),
    Id(i64),
}

/// One node of the jqTree structure shown by the HRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub label: String,
    pub class: ObjectType,
    pub owner: Option<NodeOwner>,
    pub id: String,
    pub children: Vec<TreeNode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub load_on_demand: bool,
}

impl TreeNode {
    /// Node for a remote object, `group` qualifies the id unless `None`.
    pub fn from_object(object: &RemoteObject, group: Option<i64>) -> Self {
        let (label, owner) = match object.object_type {
            ObjectType::Experimenter => (
                object
                    .full_name
                    .clone()
                    .unwrap_or_else(|| object.name.clone()),
                Some(NodeOwner::Id(object.id)),
            ),
            // groups don't carry a usable owner
            ObjectType::ExperimenterGroup => (object.name.clone(), None),
            _ => (
                object.name.clone(),
                object.owner_name.clone().map(NodeOwner::Login),
            ),
        };
        let id = match group {
            Some(gid) => format!("G:{gid}:{}:{}", object.object_type, object.id),
            None => format!("{}:{}", object.object_type, object.id),
        };
        Self {
            label,
            class: object.object_type,
            owner,
            id,
            children: Vec::new(),
            load_on_demand: false,
        }
    }

    fn on_demand(mut self) -> Self {
        self.load_on_demand = true;
        self
    }
}

/// Children of `id` behind the session guard, as requested by the HRM tree.
pub fn retrieve_children<G>(gateway: &G, id: &OmeroId) -> Result<Vec<TreeNode>, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    with_session(gateway, id, list_children)
}

/// Immediate children of a node. `ROOT` yields one tree per group of the user.
pub fn list_children<G>(gateway: &G, id: &OmeroId) -> Result<Vec<TreeNode>, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    let object_type = id.object_type();
    match object_type {
        ObjectType::BaseTree => return build_base_tree(gateway),
        ObjectType::ExperimenterGroup => {
            tracing::warn!(
                "Children requested for [{id}], but 'ExperimenterGroup' trees are only built \
                 by the group tree builder!"
            );
            return Ok(Vec::new());
        }
        _ => {}
    }

    let gid = id.group();
    let oid = id.object_id();
    tracing::debug!("generating children for: gid={gid} | obj_type={object_type} | oid={oid}");
    gateway.set_query_group(gid);

    let remote_children = if object_type == ObjectType::Experimenter {
        gateway.list_projects(oid)?
    } else {
        let Some(object) = gateway.get_object(object_type, oid)? else {
            tracing::warn!("Unable to find [{id}] in OMERO, no children to list.");
            return Ok(Vec::new());
        };
        gateway.list_children(&object)?
    };

    // images below a dataset are the last level of the tree
    let expandable = object_type != ObjectType::Dataset;
    Ok(remote_children
        .iter()
        .map(|child| {
            let node = TreeNode::from_object(child, Some(gid));
            if expandable { node.on_demand() } else { node }
        })
        .collect())
}

pub fn build_base_tree<G>(gateway: &G) -> Result<Vec<TreeNode>, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    tracing::debug!("Generating base tree...");
    gateway
        .groups_of_user()?
        .into_iter()
        .map(|group| build_group_tree(gateway, Some(group)))
        .collect()
}

/// Tree of a group and its members, the current user always first. Without
/// an explicit group the one from the session context is used.
pub fn build_group_tree<G>(
    gateway: &G,
    group: Option<RemoteObject>,
) -> Result<TreeNode, HrmOmeroError>
where
    G: OmeroGateway + ?Sized,
{
    let group = match group {
        Some(group) => group,
        None => {
            tracing::trace!("Getting group from current context...");
            gateway.group_from_context()?
        }
    };
    let gid = group.id;
    tracing::debug!("Generating tree for group {gid}...");
    gateway.set_session_group(gid)?;

    let mut group_node = TreeNode::from_object(&group, None);
    let user = gateway.current_user()?;
    group_node
        .children
        .push(TreeNode::from_object(&user, Some(gid)).on_demand());
    for colleague in gateway.colleagues()? {
        if colleague.id == user.id {
            continue;
        }
        group_node
            .children
            .push(TreeNode::from_object(&colleague, Some(gid)).on_demand());
    }
    Ok(group_node)
}
