use arrayvec::ArrayVec;
use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use super::{BackendError, Dispatch as _, Hit, Intersector, WorkerPool, check_query_lengths};
use crate::{
    geometry::{EPSILON, Ray, RayIntersectionExt as _, Triangle, WorldBox, WorldPoint, WorldVector},
    scene::{ShapeIdx, aggregate::SceneBuffers},
};

const LEAF_MAX_TRIANGLES: usize = 4;
/// Median splits keep the tree depth at log2 of the triangle count
const STACK_SIZE: usize = 64;

index_vec::define_index_type! {
    struct NodeIdx = u32;
}

/// Binary bounding volume hierarchy over all scene triangles, traversed on the CPU.
#[derive(Clone, Debug)]
pub struct TriangleBvh {
    nodes: IndexVec<NodeIdx, Node>,
    triangles: Vec<BvhTriangle>,
    pool: WorkerPool,
}

#[derive(Clone, Debug, Default)]
struct Node {
    bounds: WorldBox,
    link: NodeLink,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum NodeLink {
    #[default]
    Placeholder,
    Inner {
        left: NodeIdx,
        right: NodeIdx,
    },
    Leaf {
        first: u32,
        count: u32,
    },
}

#[derive(Clone, Debug)]
struct BvhTriangle {
    geometry: Triangle<WorldPoint>,
    shape: ShapeIdx,
    primitive: u32,
}

impl TriangleBvh {
    /// Builds the hierarchy; queries run on `pool`.
    pub fn build(buffers: &SceneBuffers, pool: WorkerPool) -> TriangleBvh {
        let mut triangles: Vec<_> = buffers
            .triangles()
            .map(|(shape, primitive, geometry)| BvhTriangle {
                geometry,
                shape,
                primitive,
            })
            .collect();

        let mut bvh = TriangleBvh {
            nodes: IndexVec::new(),
            triangles: Vec::new(),
            pool,
        };
        if !triangles.is_empty() {
            bvh.build_recursive(&mut triangles, 0);
        }
        bvh.triangles = triangles;

        log::info!(
            "Built BVH: {} triangles, {} nodes",
            bvh.triangles.len(),
            bvh.nodes.len()
        );

        bvh
    }

    /// Creates a subtree over `triangles`, which start at `offset` in the final triangle array.
    fn build_recursive(&mut self, triangles: &mut [BvhTriangle], offset: usize) -> NodeIdx {
        let bounds = padded(
            WorldBox::from_points(triangles.iter().flat_map(|t| t.geometry.iter()))
                .unwrap_or_default(),
        );

        if triangles.len() <= LEAF_MAX_TRIANGLES {
            return self.nodes.push(Node {
                bounds,
                link: NodeLink::Leaf {
                    first: offset as u32,
                    count: triangles.len() as u32,
                },
            });
        }

        let mut centroids = triangles.iter().map(|t| t.geometry.centroid());
        let axis = centroids
            .next()
            .map(|first| {
                let mut centroid_bounds = WorldBox::new(first, first);
                centroids.for_each(|c| centroid_bounds.extend(&c));
                centroid_bounds.longest_axis()
            })
            .unwrap_or_default();

        let mid = triangles.len() / 2;
        triangles.select_nth_unstable_by_key(mid, |t| OrderedFloat(t.geometry.centroid()[axis]));

        // Create placeholder node that will be overwriten later
        let node_index = self.nodes.push(Node::default());

        let (left_triangles, right_triangles) = triangles.split_at_mut(mid);
        let left = self.build_recursive(left_triangles, offset);
        let right = self.build_recursive(right_triangles, offset + mid);

        self.nodes[node_index] = Node {
            bounds,
            link: NodeLink::Inner { left, right },
        };

        node_index
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest hit inside the ray's interval.
    pub fn closest_hit(&self, ray: &Ray) -> Option<Hit> {
        let mut best = None;
        let mut t_max = ray.t_max;

        self.traverse(ray, |triangle| {
            if let Some((t, uv)) = triangle.geometry.intersect(&ray.with_range(ray.t_min, t_max)) {
                t_max = t;
                best = Some(Hit {
                    shape: triangle.shape,
                    primitive: triangle.primitive,
                    t,
                    uv,
                });
            }
            (false, t_max)
        });

        best
    }

    /// True if anything is hit inside the ray's interval.
    pub fn any_hit(&self, ray: &Ray) -> bool {
        let mut hit = false;
        self.traverse(ray, |triangle| {
            hit = triangle.geometry.intersect(ray).is_some();
            (hit, ray.t_max)
        });
        hit
    }

    /// Visits triangles in leaves whose boxes overlap the ray.
    /// The visitor returns whether to stop and the current upper bound of the interval.
    fn traverse(&self, ray: &Ray, mut visitor: impl FnMut(&BvhTriangle) -> (bool, f32)) {
        if self.nodes.is_empty() {
            return;
        }

        let mut max_t = ray.t_max;
        let mut stack = ArrayVec::<NodeIdx, STACK_SIZE>::new();
        stack.push(NodeIdx::from_usize(0));

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let (t1, t2) = node.bounds.intersect(ray);
            if t1.max(ray.t_min) > t2.min(max_t) {
                continue;
            }

            match node.link {
                NodeLink::Inner { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
                NodeLink::Leaf { first, count } => {
                    let range = first as usize..(first + count) as usize;
                    for triangle in &self.triangles[range] {
                        let (stop, new_max_t) = visitor(triangle);
                        if stop {
                            return;
                        }
                        max_t = new_max_t;
                    }
                }
                NodeLink::Placeholder => unreachable!("All placeholders are replaced during build"),
            }
        }
    }
}

impl Intersector for TriangleBvh {
    fn query_intersection(
        &self,
        rays: &[Ray],
        hits: &mut [Option<Hit>],
    ) -> Result<(), BackendError> {
        check_query_lengths(rays.len(), hits.len())?;
        self.pool.launch_for_each("QueryIntersection", hits, &|i, hit| {
            *hit = self.closest_hit(&rays[i]);
        })
    }

    fn query_occlusion(&self, rays: &[Ray], occluded: &mut [bool]) -> Result<(), BackendError> {
        check_query_lengths(rays.len(), occluded.len())?;
        self.pool
            .launch_for_each("QueryOcclusion", occluded, &|i, occluded| {
                *occluded = self.any_hit(&rays[i]);
            })
    }
}

/// Grows the box slightly so that rounding in the slab test can't reject hits on its boundary.
fn padded(b: WorldBox) -> WorldBox {
    let pad = WorldVector::repeat(b.size().norm() * 1e-5 + EPSILON);
    WorldBox::new(b.min - pad, b.max + pad)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::test::{NonzeroWorldVectorWrapper, WorldPointWrapper};
    use crate::scene::{Mesh, Scene, Vertex};
    use assert2::{assert, let_assert};
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn buffers_from_triangles(triangles: &[[WorldPoint; 3]]) -> SceneBuffers {
        let mut scene = Scene::new();
        // Two shapes, to check that shape and primitive ids come out right
        let (first, second) = triangles.split_at(triangles.len() / 2);
        for (name, chunk) in [("first", first), ("second", second)] {
            let vertices: Vec<_> = chunk
                .iter()
                .flatten()
                .map(|p| Vertex {
                    position: *p,
                    ..Vertex::default()
                })
                .collect();
            let indices = (0..vertices.len() as u32).collect();
            let_assert!(Ok(mesh) = Mesh::new(name, vertices, indices, None));
            scene.push_mesh(mesh);
        }
        let_assert!(Ok(buffers) = SceneBuffers::aggregate(&scene));
        buffers
    }

    fn brute_force(buffers: &SceneBuffers, ray: &Ray) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        for (shape, primitive, triangle) in buffers.triangles() {
            let max_t = best.map_or(ray.t_max, |b| b.t);
            if let Some((t, uv)) = triangle.intersect(&ray.with_range(ray.t_min, max_t)) {
                best = Some(Hit {
                    shape,
                    primitive,
                    t,
                    uv,
                });
            }
        }
        best
    }

    fn triangle_strategy() -> impl Strategy<Value = [WorldPoint; 3]> {
        any::<(WorldPointWrapper, WorldPointWrapper, WorldPointWrapper)>()
            .prop_map(|(a, b, c)| [*a, *b, *c])
    }

    fn ray_strategy() -> impl Strategy<Value = Ray> {
        any::<(WorldPointWrapper, NonzeroWorldVectorWrapper)>().prop_map(|(o, d)| Ray::new(*o, *d))
    }

    /// The hierarchy finds the same nearest hit as testing every triangle.
    #[proptest(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
    fn matches_brute_force(
        #[strategy(proptest::collection::vec(triangle_strategy(), 0..60))]
        triangles: Vec<[WorldPoint; 3]>,
        #[strategy(proptest::collection::vec(ray_strategy(), 1..20))] rays: Vec<Ray>,
    ) {
        let buffers = buffers_from_triangles(&triangles);
        let bvh = TriangleBvh::build(&buffers, WorkerPool::new(2, None));
        assert!(bvh.triangle_count() == triangles.len());

        let mut hits = vec![None; rays.len()];
        let mut occluded = vec![false; rays.len()];
        let_assert!(Ok(()) = bvh.query_intersection(&rays, &mut hits));
        let_assert!(Ok(()) = bvh.query_occlusion(&rays, &mut occluded));

        for ((ray, hit), occluded) in rays.iter().zip(&hits).zip(&occluded) {
            let expected = brute_force(&buffers, ray);
            assert!(hit.is_some() == expected.is_some());
            assert!(*occluded == expected.is_some());
            if let (Some(hit), Some(expected)) = (hit, expected) {
                assert!((hit.t - expected.t).abs() < 1e-4);
            }
        }
    }

    /// Results come back in the order of the submitted rays.
    #[test]
    fn results_keep_ray_order() {
        let triangles: Vec<_> = (0..40)
            .map(|i| {
                let x = i as f32 * 2.0;
                [
                    WorldPoint::new(x, 0.0, 0.0),
                    WorldPoint::new(x + 1.0, 0.0, 0.0),
                    WorldPoint::new(x, 1.0, 0.0),
                ]
            })
            .collect();
        let buffers = buffers_from_triangles(&triangles);
        let bvh = TriangleBvh::build(&buffers, WorkerPool::new(4, None));

        // Rays in reverse order of the triangles, plus misses in between
        let rays: Vec<_> = (0..80)
            .rev()
            .map(|i| {
                let x = i as f32 + 0.25;
                Ray::new(WorldPoint::new(x, 0.25, -1.0), WorldVector::z())
            })
            .collect();
        let mut hits = vec![None; rays.len()];
        let_assert!(Ok(()) = bvh.query_intersection(&rays, &mut hits));

        for (ray, hit) in rays.iter().zip(&hits) {
            let cell = ray.origin.x as u32;
            if cell % 2 == 1 {
                assert!(hit.is_none());
            } else {
                let_assert!(Some(hit) = hit);
                let triangle = cell / 2;
                assert!(hit.shape == ShapeIdx::from_usize((triangle / 20) as usize));
                assert!(hit.primitive == triangle % 20);
                assert!((hit.t - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn respects_interval() {
        let buffers = buffers_from_triangles(&[
            [
                WorldPoint::new(-1.0, -1.0, 5.0),
                WorldPoint::new(1.0, -1.0, 5.0),
                WorldPoint::new(0.0, 1.0, 5.0),
            ],
            [
                WorldPoint::new(-1.0, -1.0, 2.0),
                WorldPoint::new(1.0, -1.0, 2.0),
                WorldPoint::new(0.0, 1.0, 2.0),
            ],
        ]);
        let bvh = TriangleBvh::build(&buffers, WorkerPool::new(1, None));
        let ray = Ray::new(WorldPoint::origin(), WorldVector::z());

        let_assert!(Some(hit) = bvh.closest_hit(&ray));
        assert!((hit.t - 2.0).abs() < 1e-5);
        let_assert!(Some(hit) = bvh.closest_hit(&ray.with_range(3.0, 10.0)));
        assert!((hit.t - 5.0).abs() < 1e-5);
        assert!(!bvh.any_hit(&ray.with_range(0.0, 1.9)));
    }

    #[test]
    fn empty_scene() {
        let bvh = TriangleBvh::build(&SceneBuffers::default(), WorkerPool::new(1, None));
        let ray = Ray::new(WorldPoint::origin(), WorldVector::z());
        assert!(bvh.closest_hit(&ray).is_none());
        assert!(!bvh.any_hit(&ray));

        let_assert!(Err(BackendError::Query(_)) = bvh.query_occlusion(&[ray], &mut []));
    }
}
