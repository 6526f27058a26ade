mod common;

use common::{MockGateway, experimenter, group};
use hrm_omero::domain::{ObjectType, OmeroId};
use hrm_omero::gateway::RemoteObject;
use hrm_omero::tree::{self, NodeOwner};

#[test]
fn group_tree_lists_the_current_user_first() {
    let gateway = MockGateway {
        colleagues: vec![
            experimenter(3, "alice", "Alice Adams"),
            experimenter(7, "demo01", "Demo User"),
            experimenter(11, "bob", "Bob Brown"),
        ],
        ..MockGateway::default()
    };

    let node = tree::build_group_tree(&gateway, Some(group(9, "lab"))).unwrap();

    assert_eq!(node.id, "ExperimenterGroup:9");
    assert_eq!(node.owner, None);
    let ids = node
        .children
        .iter()
        .map(|child| child.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        ids,
        vec!["G:9:Experimenter:7", "G:9:Experimenter:3", "G:9:Experimenter:11"]
    );
    assert!(node.children.iter().all(|child| child.load_on_demand));
    assert_eq!(node.children[0].label, "Demo User");
    assert_eq!(node.children[0].owner, Some(NodeOwner::Id(7)));
    assert_eq!(gateway.count("session_group=9"), 1);
}

#[test]
fn group_tree_defaults_to_the_session_group() {
    let gateway = MockGateway {
        context_group: Some(group(4, "default")),
        ..MockGateway::default()
    };

    let node = tree::build_group_tree(&gateway, None).unwrap();

    assert_eq!(node.id, "ExperimenterGroup:4");
    assert_eq!(node.children.len(), 1);
}

#[test]
fn root_yields_one_tree_per_group() {
    let gateway = MockGateway {
        groups: vec![group(4, "default"), group(9, "lab")],
        ..MockGateway::default()
    };

    let nodes = tree::retrieve_children(&gateway, &OmeroId::root()).unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id, "ExperimenterGroup:4");
    assert_eq!(nodes[1].id, "ExperimenterGroup:9");
    assert_eq!(nodes[1].children[0].id, "G:9:Experimenter:7");
}

#[test]
fn experimenter_group_ids_have_no_children() {
    let gateway = MockGateway {
        children: vec![RemoteObject::new(ObjectType::Project, 1, "p")],
        ..MockGateway::default()
    };

    let nodes =
        tree::list_children(&gateway, &"G:9:ExperimenterGroup:9".parse().unwrap()).unwrap();

    assert!(nodes.is_empty());
    assert_eq!(gateway.count("list_children="), 0);
    assert_eq!(gateway.count("list_projects="), 0);
}

#[test]
fn experimenter_children_are_their_projects() {
    let gateway = MockGateway {
        projects: vec![
            RemoteObject::new(ObjectType::Project, 1154, "HRM_TESTDATA").with_owner(7, "demo01"),
        ],
        ..MockGateway::default()
    };

    let nodes = tree::retrieve_children(&gateway, &"G:9:Experimenter:7".parse().unwrap()).unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "G:9:Project:1154");
    assert_eq!(nodes[0].owner, Some(NodeOwner::Login("demo01".to_string())));
    assert!(nodes[0].load_on_demand);
    assert_eq!(gateway.count("list_projects=7"), 1);
    assert_eq!(gateway.count("query_group=9"), 1);
}

#[test]
fn images_below_a_dataset_are_leaves() {
    let mut gateway = MockGateway::default().with_dataset(23, "results");
    gateway.children = vec![
        RemoteObject::new(ObjectType::Image, 42, "a.tif").with_owner(7, "demo01"),
        RemoteObject::new(ObjectType::Image, 43, "b.tif").with_owner(7, "demo01"),
    ];

    let nodes = tree::retrieve_children(&gateway, &"G:9:Dataset:23".parse().unwrap()).unwrap();

    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|node| !node.load_on_demand));
    assert_eq!(nodes[1].id, "G:9:Image:43");

    let json = serde_json::to_value(&nodes[0]).unwrap();
    assert_eq!(json["class"], "Image");
    assert!(json.get("load_on_demand").is_none());
}

#[test]
fn unknown_objects_have_no_children() {
    let gateway = MockGateway::default();

    let nodes = tree::retrieve_children(&gateway, &"G:9:Project:404".parse().unwrap()).unwrap();

    assert!(nodes.is_empty());
    assert_eq!(gateway.count("list_children="), 0);
}
