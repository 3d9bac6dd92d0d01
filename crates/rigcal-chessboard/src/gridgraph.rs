use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use rigcal_core::Corner;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// Classify an edge against the board axes `u` (columns) and `v` (rows).
fn direction_on_axes(vec_to_neighbor: &Vector2<f32>, axis_angle: f32) -> NeighborDirection {
    let u = Vector2::new(axis_angle.cos(), axis_angle.sin());
    let v = Vector2::new(-u.y, u.x);
    let pu = vec_to_neighbor.dot(&u);
    let pv = vec_to_neighbor.dot(&v);
    if pu.abs() > pv.abs() {
        if pu >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if pv >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
    axis_angle: f32,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // Adjacent corners of a checkerboard have orthogonal diagonals.
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let vec_to_neighbor = neighbor.position - corner.position;
    let distance = vec_to_neighbor.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    // The edge between neighbours runs at ~45° to both diagonals.
    let edge_angle = vec_to_neighbor.y.atan2(vec_to_neighbor.x);
    let expected = std::f32::consts::FRAC_PI_4;
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - expected).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - expected).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation = (std::f32::consts::FRAC_PI_2
        - angle_diff_abs(corner.orientation, neighbor.orientation))
    .abs();

    Some(NodeNeighbor {
        direction: direction_on_axes(&vec_to_neighbor, axis_angle),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation,
    })
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = match candidate.direction {
            NeighborDirection::Right => &mut best[0],
            NeighborDirection::Left => &mut best[1],
            NeighborDirection::Up => &mut best[2],
            NeighborDirection::Down => &mut best[3],
        };

        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };

        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    /// Build the 4-connected neighbour graph of `corners`.
    ///
    /// `axis_angle` is the image angle of the board's column axis; edges are
    /// only kept when both endpoints select each other.
    pub fn new(corners: &[Corner], params: &GridGraphParams, axis_angle: f32) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let k = (params.k_neighbors + 1).min(corners.len());

        let mut neighbors = Vec::with_capacity(corners.len());
        for (i, corner) in corners.iter().enumerate() {
            let query_point = [corner.position.x, corner.position.y];
            let candidates = tree
                .nearest_n::<SquaredEuclidean>(&query_point, k)
                .into_iter()
                .map(|nn| nn.item as usize)
                .filter(|&j| j != i)
                .filter_map(|j| is_good_neighbor(corner, &corners[j], j, params, axis_angle))
                .collect::<Vec<_>>();
            neighbors.push(select_neighbors(candidates));
        }

        let mutual = neighbors
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        neighbors[n.index]
                            .iter()
                            .any(|back| back.index == i && back.direction == n.direction.opposite())
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Self { neighbors: mutual }
    }
}

/// Connected components, largest first.
pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components.sort_by(|a, b| b.len().cmp(&a.len()));
    components
}

/// Assign integer grid coordinates to a component by BFS.
///
/// Returns `None` when the walk is inconsistent: a node reached with two
/// different coordinates, or two nodes landing on the same cell.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut assigned: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut occupied: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::new();

    assigned.insert(start, (0, 0));
    occupied.insert((0, 0), start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let (i, j) = assigned[&node];
        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.step();
            let cell = (i + di, j + dj);
            match assigned.get(&neighbor.index) {
                Some(&existing) if existing != cell => return None,
                Some(_) => continue,
                None => {}
            }
            if occupied.contains_key(&cell) {
                return None;
            }
            assigned.insert(neighbor.index, cell);
            occupied.insert(cell, neighbor.index);
            queue.push_back(neighbor.index);
        }
    }

    let mut coords: Vec<_> = assigned.into_iter().map(|(n, (i, j))| (n, i, j)).collect();
    coords.sort_by_key(|&(_, i, j)| (j, i));
    Some(coords)
}
