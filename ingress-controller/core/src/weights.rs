//! Split-client indexing for runtime weight updates.
//!
//! The data plane renders every split group of a VirtualServer (and of its
//! VirtualServerRoutes, in the order the VirtualServer references them) as a
//! numbered split-clients block. Two-way splits are rendered as a key-value
//! lookup over every weight pair and reserve [`SPLIT_STRIDE`] indices; any
//! other non-empty split group reserves one.

use nginx_ingress_controller_k8s_api::configuration::{Route, Split};

/// The number of indices reserved by a two-way split: one per weight pair
/// `(0, 100)` through `(100, 0)`.
pub const SPLIT_STRIDE: usize = 101;

/// A key-value update that changes a two-way split's weights at runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightUpdate {
    pub zone: String,
    pub key: String,
    pub value: String,
}

/// Names the variables and key-value zones rendered for a VirtualServer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableNamer {
    prefix: String,
}

// === impl VariableNamer ===

impl VariableNamer {
    pub fn new(namespace: &str, name: &str) -> Self {
        let prefix = format!("vs_{}_{}", namespace, name)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self { prefix }
    }

    pub fn keyval_zone(&self, index: usize) -> String {
        format!("{}_keyval_zone_split_clients_{}", self.prefix, index)
    }

    pub fn keyval_key(&self, index: usize) -> String {
        format!("{}_keyval_key_split_clients_{}", self.prefix, index)
    }

    pub fn weights_value(&self, index: usize, first: i32, second: i32) -> String {
        format!("{}_split_clients_{}_{}_{}", self.prefix, index, first, second)
    }

    fn update(&self, index: usize, splits: &[Split]) -> WeightUpdate {
        WeightUpdate {
            zone: self.keyval_zone(index),
            key: self.keyval_key(index),
            value: self.weights_value(index, splits[0].weight, splits[1].weight),
        }
    }
}

/// The number of split-client indices consumed by a list of routes.
pub fn split_clients_len(routes: &[Route]) -> usize {
    routes
        .iter()
        .flat_map(Route::split_groups)
        .map(group_len)
        .sum()
}

/// Computes the weight updates between two versions of a route list whose
/// shapes are identical, starting at split-client index `start`.
///
/// Returns `None` if the route lists differ in shape, since their indices
/// cannot be compared.
pub fn weight_updates(
    namer: &VariableNamer,
    start: usize,
    old: &[Route],
    new: &[Route],
) -> Option<Vec<WeightUpdate>> {
    if old.len() != new.len() {
        return None;
    }

    let mut index = start;
    let mut updates = Vec::new();
    for (old, new) in old.iter().zip(new) {
        if old.matches.len() != new.matches.len() {
            return None;
        }
        for (old, new) in old.split_groups().zip(new.split_groups()) {
            if old.len() != new.len() {
                return None;
            }
            if new.len() == 2 && weights_differ(old, new) {
                updates.push(namer.update(index, new));
            }
            index += group_len(new);
        }
    }
    Some(updates)
}

/// Returns a copy of the routes with the weights of every two-way split
/// cleared, so that route lists that differ only in those weights compare
/// equal.
pub fn without_two_way_weights(routes: &[Route]) -> Vec<Route> {
    let mut routes = routes.to_vec();
    for route in &mut routes {
        clear_two_way(&mut route.splits);
        for m in &mut route.matches {
            clear_two_way(&mut m.splits);
        }
    }
    routes
}

fn clear_two_way(splits: &mut [Split]) {
    if splits.len() == 2 {
        for split in splits {
            split.weight = 0;
        }
    }
}

fn group_len(splits: &[Split]) -> usize {
    match splits.len() {
        0 => 0,
        2 => SPLIT_STRIDE,
        _ => 1,
    }
}

fn weights_differ(old: &[Split], new: &[Split]) -> bool {
    old.iter().zip(new).any(|(o, n)| o.weight != n.weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nginx_ingress_controller_k8s_api::configuration::{virtual_server::Action, Match};

    fn mk_split(weight: i32, upstream: &str) -> Split {
        Split {
            weight,
            action: Some(Action {
                pass: upstream.to_string(),
                ..Default::default()
            }),
        }
    }

    fn mk_two_way(first: i32, second: i32) -> Vec<Split> {
        vec![mk_split(first, "v1"), mk_split(second, "v2")]
    }

    fn mk_route(path: &str, splits: Vec<Split>, matches: Vec<Vec<Split>>) -> Route {
        Route {
            path: path.to_string(),
            splits,
            matches: matches
                .into_iter()
                .map(|splits| Match {
                    splits,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn namer_sanitizes_names() {
        let namer = VariableNamer::new("my-ns", "cafe.vs");
        assert_eq!(
            namer.keyval_zone(0),
            "vs_my_ns_cafe_vs_keyval_zone_split_clients_0"
        );
        assert_eq!(
            namer.keyval_key(3),
            "vs_my_ns_cafe_vs_keyval_key_split_clients_3"
        );
        assert_eq!(
            namer.weights_value(3, 30, 70),
            "vs_my_ns_cafe_vs_split_clients_3_30_70"
        );
    }

    #[test]
    fn index_strides() {
        let routes = vec![
            mk_route("/a", mk_two_way(50, 50), vec![mk_two_way(10, 90)]),
            mk_route(
                "/b",
                vec![mk_split(20, "a"), mk_split(30, "b"), mk_split(50, "c")],
                vec![],
            ),
            mk_route("/c", vec![], vec![]),
        ];
        assert_eq!(split_clients_len(&routes), 2 * SPLIT_STRIDE + 1);
    }

    #[test]
    fn match_split_weight_change() {
        let namer = VariableNamer::new("default", "vs-c");
        let old = vec![mk_route("/", vec![], vec![mk_two_way(60, 40)])];
        let new = vec![mk_route("/", vec![], vec![mk_two_way(30, 70)])];

        let updates = weight_updates(&namer, 0, &old, &new).expect("shapes must match");
        assert_eq!(
            updates,
            vec![WeightUpdate {
                zone: "vs_default_vs_c_keyval_zone_split_clients_0".to_string(),
                key: "vs_default_vs_c_keyval_key_split_clients_0".to_string(),
                value: "vs_default_vs_c_split_clients_0_30_70".to_string(),
            }]
        );
    }

    #[test]
    fn later_groups_are_offset() {
        let namer = VariableNamer::new("default", "vs");
        let old = vec![
            mk_route("/a", mk_two_way(50, 50), vec![]),
            mk_route("/b", mk_two_way(50, 50), vec![]),
        ];
        let mut new = old.clone();
        new[1].splits = mk_two_way(90, 10);

        let updates = weight_updates(&namer, 7, &old, &new).expect("shapes must match");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, namer.keyval_key(7 + SPLIT_STRIDE));
        assert_eq!(
            updates[0].value,
            namer.weights_value(7 + SPLIT_STRIDE, 90, 10)
        );
    }

    #[test]
    fn shape_change_is_not_comparable() {
        let namer = VariableNamer::new("default", "vs");
        let old = vec![mk_route("/", mk_two_way(50, 50), vec![])];
        let new = vec![mk_route("/", mk_two_way(50, 50), vec![mk_two_way(1, 99)])];
        assert_eq!(weight_updates(&namer, 0, &old, &new), None);
    }

    #[test]
    fn clearing_two_way_weights() {
        let old = vec![mk_route("/", mk_two_way(60, 40), vec![])];
        let new = vec![mk_route("/", mk_two_way(30, 70), vec![])];
        assert_ne!(old, new);
        assert_eq!(without_two_way_weights(&old), without_two_way_weights(&new));

        let three = vec![mk_route(
            "/",
            vec![mk_split(20, "a"), mk_split(30, "b"), mk_split(50, "c")],
            vec![],
        )];
        let mut changed = three.clone();
        changed[0].splits[0].weight = 10;
        assert_ne!(
            without_two_way_weights(&three),
            without_two_way_weights(&changed)
        );
    }
}
