//! A selected backend bound to a configuration for its lifetime.
//!
//! [`KernelSession::start`] resolves the backend and runs its `init` hook before
//! any kernel is called. It then optionally proves the backend against the
//! portable reference and builds a worker pool; if either step fails the
//! backend is shut down again. Dropping the session runs `shutdown`.

use crate::descriptor::{BackendDescriptor, PORTABLE_BACKEND};
use crate::i2s::QuantizedBuffer;
use crate::registry::BackendRegistry;
use crate::verify::{self, ParityReport, ParityWorkload};
use crate::view::{self, ActivationBatch, OutputRows, PackedWeights};
use neuronos_common::{BackendError, CapabilityMask, HalConfig, Result};
use rayon::prelude::*;

pub struct KernelSession<'r> {
    backend: &'r BackendDescriptor,
    capabilities: CapabilityMask,
    parity: Option<ParityReport>,
    pool: Option<rayon::ThreadPool>,
}

impl<'r> KernelSession<'r> {
    pub fn start(
        registry: &'r BackendRegistry,
        detected: CapabilityMask,
        config: &HalConfig,
    ) -> Result<Self> {
        config.validate()?;
        let capabilities = config.effective_capabilities(detected)?;
        let backend = registry.select_with_config(detected, config)?;

        backend.kernels().init().map_err(|e| BackendError::Initialization {
            backend: backend.name().to_string(),
            reason: e.to_string(),
        })?;

        let (parity, pool) = match Self::prepare(backend, config) {
            Ok(prepared) => prepared,
            Err(err) => {
                backend.kernels().shutdown();
                log::error!("kernel session on '{}' aborted: {err}", backend.name());
                return Err(err);
            }
        };

        log::info!(
            "kernel session started on {} with {} threads",
            backend,
            pool.as_ref().map_or_else(rayon::current_num_threads, |p| p.current_num_threads())
        );
        Ok(Self { backend, capabilities, parity, pool })
    }

    /// Parity check and worker pool for an initialized backend.
    fn prepare(
        backend: &BackendDescriptor,
        config: &HalConfig,
    ) -> Result<(Option<ParityReport>, Option<rayon::ThreadPool>)> {
        let parity = if config.verify_backend {
            let workload = ParityWorkload::standard()?;
            let report = verify::check_parity(backend, &PORTABLE_BACKEND, &workload)?;
            log::info!(
                "backend '{}' verified against '{}' ({} outputs)",
                report.backend,
                report.reference,
                report.outputs_compared
            );
            Some(report)
        } else {
            None
        };

        let pool = match config.num_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("neuronos-kernel-{i}"))
                    .build()
                    .map_err(|e| BackendError::Initialization {
                        backend: backend.name().to_string(),
                        reason: e.to_string(),
                    })?,
            ),
            None => None,
        };
        Ok((parity, pool))
    }

    pub fn backend(&self) -> &'r BackendDescriptor {
        self.backend
    }

    /// Capabilities selection ran against, after any config override.
    pub fn capabilities(&self) -> CapabilityMask {
        self.capabilities
    }

    /// Present when the config asked for backend verification.
    pub fn parity(&self) -> Option<&ParityReport> {
        self.parity.as_ref()
    }

    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or_else(rayon::current_num_threads, |p| p.current_num_threads())
    }

    pub fn quantize(&self, src: &[f32], nrow: usize, n_per_row: usize) -> Result<QuantizedBuffer> {
        self.backend.quantize(src, nrow, n_per_row)
    }

    pub fn quantize_into(&self, src: &[f32], nrow: usize, n_per_row: usize, dst: &mut [u8]) -> Result<usize> {
        self.backend.quantize_into(src, nrow, n_per_row, dst)
    }

    pub fn vec_dot(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        self.backend.vec_dot(weights, activations, out)
    }

    pub fn gemv(
        &self,
        weights: &PackedWeights<'_>,
        activations: &[i8],
        out: &mut OutputRows<'_>,
        col_count: usize,
    ) -> Result<()> {
        self.backend.gemv(weights, activations, out, col_count)
    }

    pub fn gemm(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        self.backend.gemm(weights, activations, out)
    }

    /// `gemv` with weight rows split across the session's workers.
    ///
    /// Each worker owns a disjoint slice of `out`, so results are identical to
    /// the serial call regardless of thread count.
    pub fn gemv_parallel(&self, weights: &PackedWeights<'_>, activations: &[i8], out: &mut [f32]) -> Result<()> {
        let rows = weights.rows();
        view::validate_gemv(weights, activations, &OutputRows::contiguous(out))?;
        if rows == 0 {
            return Ok(());
        }

        let threads = self.num_threads().max(1);
        let chunk = self.backend.tiling().row_block_size.max(rows.div_ceil(threads)).max(1);
        let out = &mut out[..rows];

        match &self.pool {
            Some(pool) => pool.install(|| self.gemv_chunks(weights, activations, out, chunk)),
            None => self.gemv_chunks(weights, activations, out, chunk),
        }
    }

    fn gemv_chunks(
        &self,
        weights: &PackedWeights<'_>,
        activations: &[i8],
        out: &mut [f32],
        chunk: usize,
    ) -> Result<()> {
        out.par_chunks_mut(chunk).enumerate().try_for_each(|(i, tile)| {
            let start = i * chunk;
            let tile_weights = weights.slice_rows(start, tile.len())?;
            let mut tile_out = OutputRows::contiguous(tile);
            self.backend.gemv(&tile_weights, activations, &mut tile_out, weights.n())
        })
    }
}

impl Drop for KernelSession<'_> {
    fn drop(&mut self) {
        self.backend.kernels().shutdown();
        log::debug!("kernel session on '{}' shut down", self.backend.name());
    }
}

impl std::fmt::Debug for KernelSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSession")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("threads", &self.num_threads())
            .finish()
    }
}
