// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::sg_table::DmaDirection;
use thiserror::Error;

/// An error surfaced to an importer or returned by an exporter callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaBufError {
    /// Attachment state could not be allocated.
    #[error("failed to allocate attachment state")]
    AllocationFailure,
    /// The exporter does not implement the requested capability.
    #[error("operation not supported by the exporter")]
    NotSupported,
    /// A caller-supplied argument was invalid.
    #[error("invalid argument")]
    InvalidArgument,
    /// The attachment is already mapped in a different direction.
    #[error("attachment already mapped {current:?}, cannot map {requested:?}")]
    ConflictingDirection {
        /// The direction of the cached mapping.
        current: DmaDirection,
        /// The direction that was requested.
        requested: DmaDirection,
    },
    /// The DMA layer could not map the scatter-gather table.
    #[error("failed to map scatter-gather table for dma")]
    DmaMappingFailure,
    /// The device already has an attachment to this buffer.
    #[error("device {device} is already attached")]
    AlreadyAttached {
        /// The importer device id.
        device: String,
    },
    /// The operation was interrupted by a signal and should be retried.
    #[error("interrupted")]
    Interrupted,
    /// A driver-specific failure, as an errno value. Either sign is accepted;
    /// values with no valid errno (zero, `i32::MIN`) are reported as `EIO`.
    #[error("exporter failure (errno {0})")]
    Exporter(i32),
}

impl DmaBufError {
    /// Returns the negative errno value reported to the importer.
    pub fn errno(&self) -> i32 {
        let errno = match self {
            DmaBufError::AllocationFailure => libc::ENOMEM,
            DmaBufError::NotSupported => libc::ENOSYS,
            DmaBufError::InvalidArgument => libc::EINVAL,
            DmaBufError::ConflictingDirection { .. } => libc::EBUSY,
            DmaBufError::DmaMappingFailure => libc::ENOMEM,
            DmaBufError::AlreadyAttached { .. } => libc::EBUSY,
            DmaBufError::Interrupted => libc::EINTR,
            // Zero or an unrepresentable magnitude must still read as failure.
            DmaBufError::Exporter(errno) => errno
                .checked_abs()
                .filter(|&e| e != 0)
                .unwrap_or(libc::EIO),
        };
        -errno
    }
}

#[cfg(test)]
mod tests {
    use super::DmaBufError;
    use crate::sg_table::DmaDirection;

    #[test]
    fn errno_values() {
        assert_eq!(DmaBufError::AllocationFailure.errno(), -libc::ENOMEM);
        assert_eq!(DmaBufError::NotSupported.errno(), -libc::ENOSYS);
        assert_eq!(DmaBufError::InvalidArgument.errno(), -libc::EINVAL);
        assert_eq!(
            DmaBufError::ConflictingDirection {
                current: DmaDirection::ToDevice,
                requested: DmaDirection::FromDevice,
            }
            .errno(),
            -libc::EBUSY
        );
        assert_eq!(DmaBufError::DmaMappingFailure.errno(), -libc::ENOMEM);
        assert_eq!(DmaBufError::Interrupted.errno(), -libc::EINTR);
    }

    #[test]
    fn exporter_errno_is_always_negative() {
        assert_eq!(DmaBufError::Exporter(libc::EIO).errno(), -libc::EIO);
        assert_eq!(DmaBufError::Exporter(-libc::EIO).errno(), -libc::EIO);
        assert_eq!(DmaBufError::Exporter(-libc::EAGAIN).errno(), -libc::EAGAIN);
    }

    #[test]
    fn exporter_errno_never_reads_as_success() {
        assert_eq!(DmaBufError::Exporter(0).errno(), -libc::EIO);
        assert_eq!(DmaBufError::Exporter(i32::MIN).errno(), -libc::EIO);
        assert_eq!(DmaBufError::Exporter(i32::MAX).errno(), -i32::MAX);
    }
}
