use ndarray::{Array1, Array2};
use ndarray_npy::NpzWriter;
use specmc::error::{Error, Result};
use specmc::math::Vec3;
use specmc::record::{InteractionBatch, Sink};
use specmc::volume::{NodeId, Scene};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Per-sensitive-volume buffered columns, world and local frame.
#[derive(Default)]
struct VolumeBuffer {
    records: InteractionBatch,
    local_position: Vec<Vec3>,
    local_direction: Vec<Vec3>,
}

impl VolumeBuffer {
    fn push(&mut self, records: &InteractionBatch, row: usize, local_position: Vec3, local_direction: Vec3) {
        self.records.position.push(records.position[row]);
        self.records.direction.push(records.direction[row]);
        self.records.process.push(records.process[row]);
        self.records.particle_kind.push(records.particle_kind[row]);
        self.records.particle_id.push(records.particle_id[row]);
        self.records.energy_deposit.push(records.energy_deposit[row]);
        self.records.material_density.push(records.material_density[row]);
        self.records.scattering_theta.push(records.scattering_theta[row]);
        self.records.scattering_phi.push(records.scattering_phi[row]);
        self.records.emission_time.push(records.emission_time[row]);
        self.records.emission_energy.push(records.emission_energy[row]);
        self.records.emission_position.push(records.emission_position[row]);
        self.records.emission_direction.push(records.emission_direction[row]);
        self.records.distance_traveled.push(records.distance_traveled[row]);
        self.local_position.push(local_position);
        self.local_direction.push(local_direction);
    }
}

fn vectors_to_array(vectors: &[Vec3]) -> Array2<f64> {
    let mut array = Array2::zeros((vectors.len(), 3));
    for (i, v) in vectors.iter().enumerate() {
        array[[i, 0]] = v.x;
        array[[i, 1]] = v.y;
        array[[i, 2]] = v.z;
    }
    array
}

/// A [`Sink`] that filters records by sensitive volume, derives the volume's
/// local frame coordinates and appends numbered `.npz` chunks per volume.
/// Chunks are flushed when the buffer exceeds its threshold and on end of
/// stream; writes to a shared output go through the supplied lock.
pub struct NpzSink {
    scene: Arc<Scene>,
    volumes: Vec<(NodeId, String)>,
    buffers: Vec<VolumeBuffer>,
    directory: PathBuf,
    buffer_limit: usize,
    buffered: usize,
    chunk: usize,
    lock: Arc<Mutex<()>>,
}

impl NpzSink {
    pub fn new(
        scene: Arc<Scene>,
        volumes: Vec<NodeId>,
        directory: PathBuf,
        buffer_limit: usize,
        lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&directory)
            .map_err(|err| Error::Sink(format!("cannot create {}: {err}", directory.display())))?;
        let volumes: Vec<(NodeId, String)> = volumes
            .into_iter()
            .map(|id| {
                let file_name = scene.name(id).replace(['/', ' '], "_");
                (id, file_name)
            })
            .collect();
        let buffers = volumes.iter().map(|_| VolumeBuffer::default()).collect();
        Ok(Self {
            scene,
            volumes,
            buffers,
            directory,
            buffer_limit,
            buffered: 0,
            chunk: 0,
            lock,
        })
    }

    fn flush(&mut self) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Sink("output lock poisoned".into()))?;
        for ((_, name), buffer) in self.volumes.iter().zip(&mut self.buffers) {
            if buffer.records.is_empty() {
                continue;
            }
            let path = self
                .directory
                .join(format!("{name}.chunk{:05}.npz", self.chunk));
            let file = File::create(&path)
                .map_err(|err| Error::Sink(format!("cannot create {}: {err}", path.display())))?;
            let mut writer = NpzWriter::new(file);
            let records = &buffer.records;
            let write_error =
                |err: ndarray_npy::WriteNpzError| Error::Sink(format!("{}: {err}", path.display()));
            writer
                .add_array("position", &vectors_to_array(&records.position))
                .map_err(write_error)?;
            writer
                .add_array("direction", &vectors_to_array(&records.direction))
                .map_err(write_error)?;
            writer
                .add_array("local_position", &vectors_to_array(&buffer.local_position))
                .map_err(write_error)?;
            writer
                .add_array(
                    "local_direction",
                    &vectors_to_array(&buffer.local_direction),
                )
                .map_err(write_error)?;
            let process_ids: Array1<u8> = records
                .process
                .iter()
                .map(|p| match p {
                    specmc::attenuation::ProcessKind::Photoelectric => 0,
                    specmc::attenuation::ProcessKind::Incoherent => 1,
                    specmc::attenuation::ProcessKind::Coherent => 2,
                })
                .collect();
            writer.add_array("process", &process_ids).map_err(write_error)?;
            writer
                .add_array(
                    "particle_kind",
                    &Array1::from(records.particle_kind.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array("particle_id", &Array1::from(records.particle_id.clone()))
                .map_err(write_error)?;
            writer
                .add_array(
                    "energy_deposit",
                    &Array1::from(records.energy_deposit.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "material_density",
                    &Array1::from(records.material_density.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "scattering_theta",
                    &Array1::from(records.scattering_theta.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "scattering_phi",
                    &Array1::from(records.scattering_phi.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array("emission_time", &Array1::from(records.emission_time.clone()))
                .map_err(write_error)?;
            writer
                .add_array(
                    "emission_energy",
                    &Array1::from(records.emission_energy.clone()),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "emission_position",
                    &vectors_to_array(&records.emission_position),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "emission_direction",
                    &vectors_to_array(&records.emission_direction),
                )
                .map_err(write_error)?;
            writer
                .add_array(
                    "distance_traveled",
                    &Array1::from(records.distance_traveled.clone()),
                )
                .map_err(write_error)?;
            writer
                .finish()
                .map_err(|err| Error::Sink(format!("{}: {err}", path.display())))?;
            log::info!("wrote {} events to {}", records.len(), path.display());
            *buffer = VolumeBuffer::default();
        }
        self.chunk += 1;
        self.buffered = 0;
        Ok(())
    }
}

impl Sink for NpzSink {
    fn record_batch(&mut self, records: &InteractionBatch) -> Result<()> {
        for ((id, _), buffer) in self.volumes.iter().zip(&mut self.buffers) {
            for row in 0..records.len() {
                let position = records.position[row];
                if !self.scene.contains(*id, position) {
                    continue;
                }
                let local_position = self.scene.world_to_local(*id, position);
                let local_direction = self
                    .scene
                    .world_to_local_dir(*id, records.direction[row]);
                buffer.push(records, row, local_position, local_direction);
                self.buffered += 1;
            }
        }
        if self.buffered > self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.flush()
    }
}
