//! The scene graph of rigidly-transformed, possibly voxelized volumes.
//!
//! Volumes live in one arena owned by a [`Scene`]; the children lists own the
//! topology and parent links are plain indices, so the cyclic ownership of a
//! pointer-based tree never arises. The whole tree is built once before the
//! first particle is emitted and is read-only during simulation.

use crate::error::{Error, Result};
use crate::geometry::BoxShape;
use crate::material::{Material, MaterialBatch};
use crate::math::{Affine, Vec3};
use crate::nonunique::NonuniqueMap;
use ndarray::Array3;
use rustc_hash::FxHashMap;

/// Index of a volume node within its [`Scene`] arena.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A batch of per-photon containing volumes; the sentinel `None` means
/// "outside every volume".
pub type VolumeBatch = NonuniqueMap<Option<NodeId>>;

/// Per-sample material override for Woodcock-parametric volumes: given a
/// position in the volume's local frame, either a material replacing the
/// volume's own or `None` to keep it.
pub trait ParametricMaterial: Send + Sync {
    /// Material override at `local`, if any.
    fn material_at(&self, local: Vec3) -> Option<Material>;
}

/// A uniform grid of material ids filling a box, the payload of a voxel
/// volume. The dictionary of distinct materials is kept small; the majorant
/// is the heaviest material present, by the Woodcock ordering.
pub struct VoxelGrid {
    voxel_size: f64,
    shape: (usize, usize, usize),
    idx: Array3<u16>,
    materials: Vec<Material>,
    majorant: Material,
}

impl VoxelGrid {
    /// Builds a grid from raw material ids and an id → material mapping.
    /// Unmapped ids become `fallback` (normally the database vacuum).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-positive voxel size or an empty
    /// grid.
    pub fn from_ids(
        ids: &Array3<u8>,
        voxel_size: f64,
        mapping: &FxHashMap<u8, Material>,
        fallback: Material,
    ) -> Result<Self> {
        if voxel_size <= 0.0 {
            return Err(Error::Config("voxel size must be positive".into()));
        }
        let dim = ids.dim();
        if dim.0 == 0 || dim.1 == 0 || dim.2 == 0 {
            return Err(Error::Config("empty voxel grid".into()));
        }
        let mut materials = vec![fallback];
        let mut dict: FxHashMap<u8, u16> = FxHashMap::default();
        let idx = ids.map(|&id| {
            *dict.entry(id).or_insert_with(|| {
                let material = mapping.get(&id).cloned().unwrap_or_else(|| materials[0].clone());
                if let Some(pos) = materials.iter().position(|m| *m == material) {
                    u16::try_from(pos).unwrap_or_else(|_| unreachable!())
                } else {
                    materials.push(material);
                    u16::try_from(materials.len() - 1).expect("voxel material dictionary overflow")
                }
            })
        });
        let majorant = materials
            .iter()
            .max_by(|a, b| a.woodcock_key().total_cmp(&b.woodcock_key()))
            .cloned()
            .unwrap_or_else(|| unreachable!());
        Ok(Self {
            voxel_size,
            shape: dim,
            idx,
            materials,
            majorant,
        })
    }

    /// Full extent of the grid in each axis.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        Vec3::new(
            self.voxel_size * self.shape.0 as f64,
            self.voxel_size * self.shape.1 as f64,
            self.voxel_size * self.shape.2 as f64,
        )
    }

    /// Edge length of one voxel.
    #[must_use]
    pub const fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// The heaviest material present in the grid.
    #[must_use]
    pub fn majorant(&self) -> Material {
        self.majorant.clone()
    }

    fn voxel_index(&self, coordinate: f64, half: f64, count: usize) -> usize {
        let i = ((coordinate + half) / self.voxel_size).floor();
        if i < 0.0 {
            0
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let i = i as usize;
            i.min(count - 1)
        }
    }

    /// Material of the voxel containing `local`; positions outside the grid
    /// clamp to the boundary voxel.
    #[must_use]
    pub fn material_at(&self, local: Vec3) -> Material {
        let half = self.size() * 0.5;
        let i = self.voxel_index(local.x, half.x, self.shape.0);
        let j = self.voxel_index(local.y, half.y, self.shape.1);
        let k = self.voxel_index(local.z, half.z, self.shape.2);
        self.materials[self.idx[[i, j, k]] as usize].clone()
    }
}

/// The closed set of volume behaviours.
pub enum VolumeKind {
    /// Homogeneous volume of its intrinsic material.
    Plain,
    /// Homogeneous volume whose free paths are sampled against a majorant,
    /// requiring the real-vs-fictitious test at every candidate interaction.
    Woodcock,
    /// Woodcock volume with a per-sample material override.
    Parametric(std::sync::Arc<dyn ParametricMaterial>),
    /// Woodcock volume backed by a uniform material-id grid.
    Voxel(VoxelGrid),
}

impl VolumeKind {
    /// Whether free paths in this volume are sampled against a majorant.
    #[must_use]
    pub const fn is_woodcock(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    const fn may_have_children(&self) -> bool {
        matches!(self, Self::Plain)
    }
}

struct Node {
    name: String,
    geometry: BoxShape,
    material: Material,
    /// Maps parent-frame coordinates into this node's local frame.
    transform: Affine,
    kind: VolumeKind,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    duplicate_counter: u32,
}

/// An arena-allocated volume tree rooted at a fixed, non-transformable
/// simulation volume.
pub struct Scene {
    nodes: Vec<Node>,
    root: NodeId,
    vacuum: Material,
}

impl Scene {
    /// Creates a scene whose root is a homogeneous box of `material`.
    /// `vacuum` is the sentinel returned by point-location queries that hit
    /// no volume.
    #[must_use]
    pub fn new(geometry: BoxShape, material: Material, vacuum: Material, name: &str) -> Self {
        let root = Node {
            name: name.into(),
            geometry,
            material,
            transform: Affine::IDENTITY,
            kind: VolumeKind::Plain,
            children: Vec::new(),
            parent: None,
            duplicate_counter: 0,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            vacuum,
        }
    }

    /// The root volume.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The scene's vacuum sentinel material.
    #[must_use]
    pub fn vacuum(&self) -> Material {
        self.vacuum.clone()
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Adds a child volume under `parent` and returns its id. Children are
    /// tested in insertion order by every traversal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `parent` cannot hold children (Woodcock
    /// parametric and voxel volumes are leaves).
    pub fn add_volume(
        &mut self,
        parent: NodeId,
        name: &str,
        geometry: BoxShape,
        material: Material,
        kind: VolumeKind,
    ) -> Result<NodeId> {
        if !self.node(parent).kind.may_have_children() {
            return Err(Error::Config(format!(
                "volume {} cannot hold children",
                self.node(parent).name
            )));
        }
        let id = NodeId(u32::try_from(self.nodes.len()).expect("scene arena overflow"));
        self.nodes.push(Node {
            name: name.into(),
            geometry,
            material,
            transform: Affine::IDENTITY,
            kind,
            children: Vec::new(),
            parent: Some(parent),
            duplicate_counter: 0,
        });
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    /// Volume name.
    #[must_use]
    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    /// Finds a volume by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(|i| NodeId(u32::try_from(i).unwrap_or_else(|_| unreachable!())))
    }

    /// The volume's geometry.
    #[must_use]
    pub fn geometry(&self, id: NodeId) -> &BoxShape {
        &self.node(id).geometry
    }

    /// Whether the volume samples free paths against a majorant.
    #[must_use]
    pub fn is_woodcock(&self, id: NodeId) -> bool {
        self.node(id).kind.is_woodcock()
    }

    /// The volume's intrinsic material: its own for homogeneous volumes, the
    /// grid majorant for voxel volumes.
    #[must_use]
    pub fn intrinsic_material(&self, id: NodeId) -> Material {
        match &self.node(id).kind {
            VolumeKind::Voxel(grid) => grid.majorant(),
            _ => self.node(id).material.clone(),
        }
    }

    /// Children of a volume, in insertion order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    fn ensure_transformable(&self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(Error::Config("the root volume is not transformable".into()));
        }
        Ok(())
    }

    /// Moves the volume by `t` in its parent's frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when applied to the root.
    pub fn translate(&mut self, id: NodeId, t: Vec3) -> Result<()> {
        self.ensure_transformable(id)?;
        let node = &mut self.nodes[id.index()];
        node.transform = node.transform.compose(&Affine::translation(-t));
        Ok(())
    }

    /// Moves the volume by `t` along its own local axes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when applied to the root.
    pub fn translate_local(&mut self, id: NodeId, t: Vec3) -> Result<()> {
        self.ensure_transformable(id)?;
        let node = &mut self.nodes[id.index()];
        node.transform = Affine::translation(-t).compose(&node.transform);
        Ok(())
    }

    /// Rotates the volume by the z-y-x Euler angles about `center`, both
    /// given in the parent frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when applied to the root.
    pub fn rotate(
        &mut self,
        id: NodeId,
        alpha: f64,
        beta: f64,
        gamma: f64,
        center: Vec3,
    ) -> Result<()> {
        self.ensure_transformable(id)?;
        let rotation = Affine::translation(-center)
            .compose(&Affine::rotation(-alpha, -beta, -gamma))
            .compose(&Affine::translation(center));
        let node = &mut self.nodes[id.index()];
        node.transform = node.transform.compose(&rotation);
        Ok(())
    }

    /// Transforms a world-frame position into the volume's local frame by
    /// composing the parent chain.
    #[must_use]
    pub fn world_to_local(&self, id: NodeId, p: Vec3) -> Vec3 {
        self.path_from_root(id)
            .into_iter()
            .fold(p, |p, node| self.node(node).transform.transform_point(p))
    }

    /// Transforms a world-frame direction into the volume's local frame.
    #[must_use]
    pub fn world_to_local_dir(&self, id: NodeId, d: Vec3) -> Vec3 {
        self.path_from_root(id)
            .into_iter()
            .fold(d, |d, node| self.node(node).transform.transform_dir(d))
    }

    /// Transforms a local-frame position back into the world frame.
    #[must_use]
    pub fn local_to_world(&self, id: NodeId, p: Vec3) -> Vec3 {
        self.path_from_root(id)
            .into_iter()
            .rev()
            .fold(p, |p, node| {
                self.node(node).transform.inverse_rigid().transform_point(p)
            })
    }

    fn path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut cursor = id;
        while let Some(parent) = self.node(cursor).parent {
            path.push(parent);
            cursor = parent;
        }
        path.reverse();
        path
    }

    /// Whether the world-frame point lies inside the volume.
    #[must_use]
    pub fn contains(&self, id: NodeId, world: Vec3) -> bool {
        self.node(id).geometry.contains(self.world_to_local(id, world))
    }

    /// For each ray: the distance to the next surface crossing within the
    /// tree, and the deepest volume containing the origin (the sentinel for
    /// origins outside everything). Rays outside the root that miss it get
    /// `+∞`.
    #[must_use]
    pub fn cast_path(&self, positions: &[Vec3], directions: &[Vec3]) -> (Vec<f64>, VolumeBatch) {
        let (distance, current) = self.cast_rec(self.root, positions, directions);
        let mut volumes = VolumeBatch::new(positions.len(), None);
        for (i, id) in current.into_iter().enumerate() {
            if id.is_some() {
                volumes.set(i, &id);
            }
        }
        (distance, volumes)
    }

    fn cast_rec(
        &self,
        id: NodeId,
        positions: &[Vec3],
        directions: &[Vec3],
    ) -> (Vec<f64>, Vec<Option<NodeId>>) {
        let node = self.node(id);
        let n = positions.len();
        let mut distance = vec![f64::INFINITY; n];
        let mut current = vec![None; n];
        let mut inside_rows = Vec::new();
        for i in 0..n {
            let (d, inside) = node.geometry.cast_path(positions[i], directions[i]);
            distance[i] = d;
            if inside {
                current[i] = Some(id);
                inside_rows.push(i);
            }
        }
        if !node.children.is_empty() && !inside_rows.is_empty() {
            let sub_pos: Vec<Vec3> = inside_rows.iter().map(|&i| positions[i]).collect();
            let sub_dir: Vec<Vec3> = inside_rows.iter().map(|&i| directions[i]).collect();
            let mut child_min = vec![f64::INFINITY; inside_rows.len()];
            for &child in &node.children {
                let t = &self.node(child).transform;
                let child_pos: Vec<Vec3> = sub_pos.iter().map(|&p| t.transform_point(p)).collect();
                let child_dir: Vec<Vec3> = sub_dir.iter().map(|&d| t.transform_dir(d)).collect();
                let (child_distance, child_current) = self.cast_rec(child, &child_pos, &child_dir);
                for (j, &row) in inside_rows.iter().enumerate() {
                    // ties between overlapping siblings resolve to the first
                    if child_current[j].is_some() && current[row] == Some(id) {
                        current[row] = child_current[j];
                    }
                    child_min[j] = child_min[j].min(child_distance[j]);
                }
            }
            for (j, &row) in inside_rows.iter().enumerate() {
                distance[row] = distance[row].min(child_min[j]);
            }
        }
        (distance, current)
    }

    /// The material at each world-frame point: the deepest containing
    /// volume's material, with the parametric/voxel override applied last;
    /// the sentinel vacuum outside every volume.
    #[must_use]
    pub fn materials_at(&self, positions: &[Vec3]) -> MaterialBatch {
        let resolved = self.material_rec(self.root, positions);
        let mut batch = MaterialBatch::new(positions.len(), self.vacuum.clone());
        for (i, material) in resolved.into_iter().enumerate() {
            if let Some(material) = material {
                batch.set(i, &material);
            }
        }
        batch
    }

    fn material_rec(&self, id: NodeId, positions: &[Vec3]) -> Vec<Option<Material>> {
        let node = self.node(id);
        let n = positions.len();
        let mut out = vec![None; n];
        let mut inside_rows = Vec::new();
        for (i, &p) in positions.iter().enumerate() {
            if node.geometry.contains(p) {
                out[i] = Some(node.material.clone());
                inside_rows.push(i);
            }
        }
        if !node.children.is_empty() && !inside_rows.is_empty() {
            let sub_pos: Vec<Vec3> = inside_rows.iter().map(|&i| positions[i]).collect();
            let mut claimed = vec![false; inside_rows.len()];
            for &child in &node.children {
                let t = &self.node(child).transform;
                let child_pos: Vec<Vec3> = sub_pos.iter().map(|&p| t.transform_point(p)).collect();
                let child_materials = self.material_rec(child, &child_pos);
                for (j, &row) in inside_rows.iter().enumerate() {
                    if let Some(material) = &child_materials[j] {
                        if !claimed[j] {
                            out[row] = Some(material.clone());
                            claimed[j] = true;
                        }
                    }
                }
            }
        }
        match &node.kind {
            VolumeKind::Parametric(function) => {
                for &i in &inside_rows {
                    if let Some(material) = function.material_at(positions[i]) {
                        out[i] = Some(material);
                    }
                }
            }
            VolumeKind::Voxel(grid) => {
                for &i in &inside_rows {
                    out[i] = Some(grid.material_at(positions[i]));
                }
            }
            VolumeKind::Plain | VolumeKind::Woodcock => {}
        }
        out
    }

    /// Deep-copies the subtree rooted at `id` and attaches the copy to the
    /// same parent. Copied volumes get a fresh `.n` counter suffix; the
    /// copies' parent links point into the copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when duplicating the root.
    pub fn duplicate(&mut self, id: NodeId) -> Result<NodeId> {
        let parent = self
            .node(id)
            .parent
            .ok_or_else(|| Error::Config("the root volume cannot be duplicated".into()))?;
        let copy = self.copy_rec(id, parent);
        self.nodes[parent.index()].children.push(copy);
        Ok(copy)
    }

    fn copy_rec(&mut self, src: NodeId, parent: NodeId) -> NodeId {
        self.nodes[src.index()].duplicate_counter += 1;
        let source = &self.nodes[src.index()];
        let name = format!("{}.{}", source.name, source.duplicate_counter);
        let kind = match &source.kind {
            VolumeKind::Plain => VolumeKind::Plain,
            VolumeKind::Woodcock => VolumeKind::Woodcock,
            VolumeKind::Parametric(function) => VolumeKind::Parametric(function.clone()),
            VolumeKind::Voxel(grid) => VolumeKind::Voxel(VoxelGrid {
                voxel_size: grid.voxel_size,
                shape: grid.shape,
                idx: grid.idx.clone(),
                materials: grid.materials.clone(),
                majorant: grid.majorant.clone(),
            }),
        };
        let node = Node {
            name,
            geometry: source.geometry.clone(),
            material: source.material.clone(),
            transform: source.transform,
            kind,
            children: Vec::new(),
            parent: Some(parent),
            duplicate_counter: 0,
        };
        let id = NodeId(u32::try_from(self.nodes.len()).expect("scene arena overflow"));
        let children = self.nodes[src.index()].children.clone();
        self.nodes.push(node);
        for child in children {
            let copied = self.copy_rec(child, id);
            self.nodes[id.index()].children.push(copied);
        }
        id
    }
}
