//! Linux ISST driver transport
//!
//! Talks to `/dev/isst_interface` with the `ISST_IF_*` ioctls. Mailbox and
//! MMIO reads are each sent as one multi-command ioctl (split only at the
//! driver's per-call limit).

use crate::error::HardwareError;
use crate::sst::io::{SstIo, SstRequest};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Default device node of the ISST driver
pub const ISST_DEVICE_PATH: &str = "/dev/isst_interface";

/// Commands the driver accepts per ioctl
const MAX_CMDS_PER_IOCTL: usize = 64;

// _IOWR(0xFE, 1, ptr), _IOW(0xFE, 2, ptr), _IOWR(0xFE, 3, ptr)
const ISST_IF_GET_PHY_ID: u64 = 0xC008_FE01;
const ISST_IF_IO_CMD: u64 = 0x4008_FE02;
const ISST_IF_MBOX_COMMAND: u64 = 0xC008_FE03;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IsstCpuMap {
    logical_cpu: u32,
    physical_cpu: u32,
}

#[repr(C)]
struct IsstCpuMaps {
    cmd_count: u32,
    cpu_map: [IsstCpuMap; 1],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IsstIoReg {
    read_write: u32,
    logical_cpu: u32,
    reg: u32,
    value: u32,
}

#[repr(C)]
struct IsstIoRegs {
    req_count: u32,
    io_reg: [IsstIoReg; MAX_CMDS_PER_IOCTL],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IsstMboxCmd {
    logical_cpu: u32,
    parameter: u32,
    req_data: u32,
    resp_data: u32,
    command: u16,
    sub_command: u16,
    reserved: u32,
}

#[repr(C)]
struct IsstMboxCmds {
    cmd_count: u32,
    mbox_cmd: [IsstMboxCmd; MAX_CMDS_PER_IOCTL],
}

/// ISST character device
pub struct IsstDevice {
    file: File,
    path: String,
    punit_cache: RefCell<HashMap<usize, u32>>,
}

impl IsstDevice {
    /// Open the driver at [`ISST_DEVICE_PATH`]
    pub fn open() -> Result<Self, HardwareError> {
        Self::open_path(ISST_DEVICE_PATH)
    }

    pub fn open_path(path: &str) -> Result<Self, HardwareError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| HardwareError::Io {
                path: path.to_string(),
                source,
            })?;
        Ok(Self {
            file,
            path: path.to_string(),
            punit_cache: RefCell::new(HashMap::new()),
        })
    }

    fn ioctl<T>(&self, request: u64, arg: &mut T) -> Result<(), HardwareError> {
        // SAFETY: arg points to a repr(C) struct laid out as the driver expects
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg as *mut T) };
        if ret < 0 {
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EPERM) {
                return Err(HardwareError::InsufficientPermissions(self.path.clone()));
            }
            return Err(HardwareError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    fn read_mbox_chunk(&self, chunk: &[(usize, u16, u16, u32)]) -> Result<Vec<u32>, HardwareError> {
        let mut cmds = IsstMboxCmds {
            cmd_count: chunk.len() as u32,
            mbox_cmd: [IsstMboxCmd::default(); MAX_CMDS_PER_IOCTL],
        };
        for (slot, &(cpu, command, subcommand, request_data)) in cmds.mbox_cmd.iter_mut().zip(chunk) {
            *slot = IsstMboxCmd {
                logical_cpu: cpu as u32,
                req_data: request_data,
                command,
                sub_command: subcommand,
                ..Default::default()
            };
        }
        self.ioctl(ISST_IF_MBOX_COMMAND, &mut cmds)?;
        Ok(cmds.mbox_cmd[..chunk.len()].iter().map(|c| c.resp_data).collect())
    }

    fn read_mmio_chunk(&self, chunk: &[(usize, u32)]) -> Result<Vec<u32>, HardwareError> {
        let mut regs = IsstIoRegs {
            req_count: chunk.len() as u32,
            io_reg: [IsstIoReg::default(); MAX_CMDS_PER_IOCTL],
        };
        for (slot, &(cpu, offset)) in regs.io_reg.iter_mut().zip(chunk) {
            *slot = IsstIoReg {
                read_write: 0,
                logical_cpu: cpu as u32,
                reg: offset,
                value: 0,
            };
        }
        self.ioctl(ISST_IF_IO_CMD, &mut regs)?;
        Ok(regs.io_reg[..chunk.len()].iter().map(|r| r.value).collect())
    }
}

impl SstIo for IsstDevice {
    fn punit_core(&self, cpu: usize) -> Result<u32, HardwareError> {
        if let Some(&core) = self.punit_cache.borrow().get(&cpu) {
            return Ok(core);
        }
        let mut maps = IsstCpuMaps {
            cmd_count: 1,
            cpu_map: [IsstCpuMap {
                logical_cpu: cpu as u32,
                physical_cpu: 0,
            }],
        };
        self.ioctl(ISST_IF_GET_PHY_ID, &mut maps)?;
        // Bit 0 of the physical id selects the hardware thread
        let core = maps.cpu_map[0].physical_cpu >> 1;
        self.punit_cache.borrow_mut().insert(cpu, core);
        Ok(core)
    }

    fn read_many(&self, requests: &[SstRequest]) -> Result<Vec<u32>, HardwareError> {
        let mut mbox = Vec::new();
        let mut mmio = Vec::new();
        for request in requests {
            match *request {
                SstRequest::Mbox {
                    cpu,
                    command,
                    subcommand,
                    request_data,
                } => mbox.push((cpu, command, subcommand, request_data)),
                SstRequest::Mmio { cpu, offset } => mmio.push((cpu, offset)),
            }
        }

        let mut mbox_values = Vec::with_capacity(mbox.len());
        for chunk in mbox.chunks(MAX_CMDS_PER_IOCTL) {
            mbox_values.extend(self.read_mbox_chunk(chunk)?);
        }
        let mut mmio_values = Vec::with_capacity(mmio.len());
        for chunk in mmio.chunks(MAX_CMDS_PER_IOCTL) {
            mmio_values.extend(self.read_mmio_chunk(chunk)?);
        }

        let mut mbox_iter = mbox_values.into_iter();
        let mut mmio_iter = mmio_values.into_iter();
        requests
            .iter()
            .map(|request| {
                let next = match request {
                    SstRequest::Mbox { .. } => mbox_iter.next(),
                    SstRequest::Mmio { .. } => mmio_iter.next(),
                };
                next.ok_or_else(|| HardwareError::Unknown(format!("no response for {}", request)))
            })
            .collect()
    }

    fn write_mbox(
        &self,
        cpu: usize,
        command: u16,
        subcommand: u16,
        parameter: u32,
        data: u32,
    ) -> Result<(), HardwareError> {
        let mut cmds = IsstMboxCmds {
            cmd_count: 1,
            mbox_cmd: [IsstMboxCmd::default(); MAX_CMDS_PER_IOCTL],
        };
        cmds.mbox_cmd[0] = IsstMboxCmd {
            logical_cpu: cpu as u32,
            parameter,
            req_data: data,
            command,
            sub_command: subcommand,
            ..Default::default()
        };
        self.ioctl(ISST_IF_MBOX_COMMAND, &mut cmds)
    }

    fn write_mmio(&self, cpu: usize, offset: u32, value: u32) -> Result<(), HardwareError> {
        let mut regs = IsstIoRegs {
            req_count: 1,
            io_reg: [IsstIoReg::default(); MAX_CMDS_PER_IOCTL],
        };
        regs.io_reg[0] = IsstIoReg {
            read_write: 1,
            logical_cpu: cpu as u32,
            reg: offset,
            value,
        };
        self.ioctl(ISST_IF_IO_CMD, &mut regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layout_matches_driver() {
        assert_eq!(std::mem::size_of::<IsstMboxCmd>(), 24);
        assert_eq!(std::mem::size_of::<IsstIoReg>(), 16);
        assert_eq!(std::mem::size_of::<IsstCpuMap>(), 8);
        assert_eq!(std::mem::size_of::<IsstMboxCmds>(), 4 + 24 * MAX_CMDS_PER_IOCTL);
    }

    #[test]
    fn test_open_missing_device() {
        let err = IsstDevice::open_path("/nonexistent/isst_interface")
            .err()
            .unwrap();
        assert!(matches!(err, HardwareError::Io { .. }));
    }

    #[test]
    #[ignore = "Requires the isst_if driver"]
    fn test_read_config_level() {
        let device = IsstDevice::open().unwrap();
        let values = device
            .read_many(&[SstRequest::Mbox {
                cpu: 0,
                command: 0x7f,
                subcommand: 0x00,
                request_data: 0,
            }])
            .unwrap();
        assert_eq!(values.len(), 1);
    }
}
