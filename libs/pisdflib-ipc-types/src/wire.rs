//! Little-endian wire codec for [`JobMessage`].
//!
//! Layout: fixed header, then input FIFOs, output FIFOs, exec constraints,
//! notify flags and the i64 input-parameter array. FIFO records are padded
//! to 20 bytes so the attribute byte keeps the arrays 2-byte aligned.

use thiserror::Error;

use crate::fifo::{Fifo, FifoAttribute};
use crate::messages::{ExecConstraint, JobMessage};

const HEADER_SIZE: usize = 12 + 6 * 2;
const FIFO_SIZE: usize = 20;
const CONSTRAINT_SIZE: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unknown fifo attribute byte {0:#x}")]
    BadAttribute(u8),
}

impl JobMessage {
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + (self.input_fifos.len() + self.output_fifos.len()) * FIFO_SIZE
            + self.exec_constraints.len() * CONSTRAINT_SIZE
            + self.notify_flags.len()
            + self.input_params.len() * 8
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.kernel_ix.to_le_bytes());
        out.extend_from_slice(&self.task_ix.to_le_bytes());
        out.extend_from_slice(&self.job_exec_ix.to_le_bytes());
        out.extend_from_slice(&(self.input_fifos.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.output_fifos.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.input_params.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.output_param_count.to_le_bytes());
        out.extend_from_slice(&(self.exec_constraints.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.notify_flags.len() as u16).to_le_bytes());
        for fifo in self.input_fifos.iter().chain(&self.output_fifos) {
            encode_fifo(fifo, &mut out);
        }
        for constraint in &self.exec_constraints {
            out.extend_from_slice(&constraint.lrt_ix.to_le_bytes());
            out.extend_from_slice(&constraint.job_exec_ix.to_le_bytes());
        }
        for &flag in &self.notify_flags {
            out.push(flag as u8);
        }
        for param in &self.input_params {
            out.extend_from_slice(&param.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader { bytes, pos: 0 };
        let kernel_ix = reader.u32()?;
        let task_ix = reader.u32()?;
        let job_exec_ix = reader.u32()?;
        let n_input_fifos = reader.u16()? as usize;
        let n_output_fifos = reader.u16()? as usize;
        let n_input_params = reader.u16()? as usize;
        let output_param_count = reader.u16()?;
        let n_constraints = reader.u16()? as usize;
        let n_notify_flags = reader.u16()? as usize;

        let mut input_fifos = Vec::with_capacity(n_input_fifos);
        for _ in 0..n_input_fifos {
            input_fifos.push(decode_fifo(&mut reader)?);
        }
        let mut output_fifos = Vec::with_capacity(n_output_fifos);
        for _ in 0..n_output_fifos {
            output_fifos.push(decode_fifo(&mut reader)?);
        }
        let mut exec_constraints = Vec::with_capacity(n_constraints);
        for _ in 0..n_constraints {
            exec_constraints.push(ExecConstraint {
                lrt_ix: reader.u16()?,
                job_exec_ix: reader.u32()?,
            });
        }
        let mut notify_flags = Vec::with_capacity(n_notify_flags);
        for _ in 0..n_notify_flags {
            notify_flags.push(reader.u8()? != 0);
        }
        let mut input_params = Vec::with_capacity(n_input_params);
        for _ in 0..n_input_params {
            input_params.push(reader.i64()?);
        }
        Ok(Self {
            kernel_ix,
            task_ix,
            job_exec_ix,
            input_fifos,
            output_fifos,
            input_params,
            output_param_count,
            exec_constraints,
            notify_flags,
        })
    }
}

fn encode_fifo(fifo: &Fifo, out: &mut Vec<u8>) {
    out.extend_from_slice(&fifo.address.to_le_bytes());
    out.extend_from_slice(&fifo.offset.to_le_bytes());
    out.extend_from_slice(&fifo.size.to_le_bytes());
    out.extend_from_slice(&fifo.count.to_le_bytes());
    out.push(fifo.attribute as u8);
    out.push(0);
}

fn decode_fifo(reader: &mut Reader<'_>) -> Result<Fifo, WireError> {
    let address = reader.u64()?;
    let offset = reader.u32()?;
    let size = reader.u32()?;
    let count = reader.u16()?;
    let raw_attr = reader.u8()?;
    let _pad = reader.u8()?;
    let attribute = FifoAttribute::from_u8(raw_attr).ok_or(WireError::BadAttribute(raw_attr))?;
    Ok(Fifo {
        address,
        offset,
        size,
        count,
        attribute,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        if self.pos + n > self.bytes.len() {
            return Err(WireError::Truncated {
                needed: self.pos + n,
                available: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
