//! Speed Select IoGroup
//!
//! Mailbox responses and MMIO registers are exposed as a raw `#` signal per
//! request plus one decoded signal per bit field. Controls write a single
//! field with read-modify-write of the register.

use crate::error::PlatformError;
use crate::iogroup::field::{BitField, FieldSignal, RawSignal};
use crate::iogroup::object::{ControlSink, Requirement, SignalSource, Trigger, WriteDependency};
use crate::iogroup::{
    Aggregation, BatchRegistry, Behavior, ControlId, ControlInfo, Format, IoGroup, SignalInfo, Units,
};
use crate::sst::io::{SharedBatch, SstBatch, SstIo, SstRegister, SstRequest};
use crate::topo::{Domain, PlatformTopo};

use std::rc::Rc;

const TURBO_FREQUENCY: u16 = 0x7f;
const SUPPORT_CAPABILITIES: u16 = 0x94;
const CORE_PRIORITY: u16 = 0xd0;

struct MboxField {
    name: &'static str,
    request_data: u32,
    bits: BitField,
    multiplier: f64,
    units: Units,
    aggregation: Aggregation,
    description: &'static str,
}

struct MboxSignalDef {
    name: &'static str,
    command: u16,
    subcommand: u16,
    fields: &'static [MboxField],
}

const fn field(
    name: &'static str,
    request_data: u32,
    begin: u32,
    end: u32,
    multiplier: f64,
    units: Units,
    description: &'static str,
) -> MboxField {
    MboxField {
        name,
        request_data,
        bits: BitField::new(begin, end),
        multiplier,
        units,
        aggregation: Aggregation::ExpectSame,
        description,
    }
}

const fn summed(mut f: MboxField) -> MboxField {
    f.aggregation = Aggregation::Sum;
    f
}

macro_rules! buckets {
    ($low:expr, $high:expr, $mult:expr, $units:expr, $desc:literal) => {
        &[
            field("0", $low, 0, 7, $mult, $units, concat!($desc, " in bucket 0")),
            field("1", $low, 8, 15, $mult, $units, concat!($desc, " in bucket 1")),
            field("2", $low, 16, 23, $mult, $units, concat!($desc, " in bucket 2")),
            field("3", $low, 24, 31, $mult, $units, concat!($desc, " in bucket 3")),
            field("4", $high, 0, 7, $mult, $units, concat!($desc, " in bucket 4")),
            field("5", $high, 8, 15, $mult, $units, concat!($desc, " in bucket 5")),
            field("6", $high, 16, 23, $mult, $units, concat!($desc, " in bucket 6")),
            field("7", $high, 24, 31, $mult, $units, concat!($desc, " in bucket 7")),
        ]
    };
}

const MBOX_SIGNALS: &[MboxSignalDef] = &[
    MboxSignalDef {
        name: "SST::CONFIG_LEVEL",
        command: TURBO_FREQUENCY,
        subcommand: 0x00,
        fields: &[field("LEVEL", 0x00, 16, 23, 1.0, Units::None, "SST configuration level")],
    },
    MboxSignalDef {
        name: "SST::TURBOFREQ_SUPPORT",
        command: TURBO_FREQUENCY,
        subcommand: 0x01,
        fields: &[summed(field("SUPPORTED", 0x00, 0, 0, 1.0, Units::None, "SST-TF is supported"))],
    },
    MboxSignalDef {
        name: "SST::HIGHPRIORITY_NCORES",
        command: TURBO_FREQUENCY,
        subcommand: 0x10,
        fields: buckets!(
            0x0000,
            0x0100,
            1.0,
            Units::None,
            "Count of high-priority turbo frequency cores"
        ),
    },
    MboxSignalDef {
        name: "SST::HIGHPRIORITY_FREQUENCY_SSE",
        command: TURBO_FREQUENCY,
        subcommand: 0x11,
        fields: buckets!(
            0x000000,
            0x000100,
            1e8,
            Units::Hertz,
            "High-priority turbo frequency at the SSE license level"
        ),
    },
    MboxSignalDef {
        name: "SST::HIGHPRIORITY_FREQUENCY_AVX2",
        command: TURBO_FREQUENCY,
        subcommand: 0x11,
        fields: buckets!(
            0x010000,
            0x010100,
            1e8,
            Units::Hertz,
            "High-priority turbo frequency at the AVX2 license level"
        ),
    },
    MboxSignalDef {
        name: "SST::HIGHPRIORITY_FREQUENCY_AVX512",
        command: TURBO_FREQUENCY,
        subcommand: 0x11,
        fields: buckets!(
            0x020000,
            0x020100,
            1e8,
            Units::Hertz,
            "High-priority turbo frequency at the AVX512 license level"
        ),
    },
    MboxSignalDef {
        name: "SST::LOWPRIORITY_FREQUENCY",
        command: TURBO_FREQUENCY,
        subcommand: 0x12,
        fields: &[
            field("SSE", 0x00, 0, 7, 1e8, Units::Hertz, "Low-priority turbo frequency at the SSE license level"),
            field("AVX2", 0x00, 8, 15, 1e8, Units::Hertz, "Low-priority turbo frequency at the AVX2 license level"),
            field("AVX512", 0x00, 16, 23, 1e8, Units::Hertz, "Low-priority turbo frequency at the AVX512 license level"),
        ],
    },
    MboxSignalDef {
        name: "SST::COREPRIORITY_SUPPORT",
        command: SUPPORT_CAPABILITIES,
        subcommand: 0x03,
        fields: &[summed(field("CAPABILITIES", 0x00, 0, 0, 1.0, Units::None, "SST-CP is supported"))],
    },
];

struct MboxControlDef {
    name: &'static str,
    command: u16,
    subcommand: u16,
    write_param: u32,
    field: &'static str,
    bits: BitField,
    description: &'static str,
    read_subcommand: u16,
    read_request_data: u32,
}

const TURBO_ENABLE: MboxControlDef = MboxControlDef {
    name: "SST::TURBO_ENABLE",
    command: TURBO_FREQUENCY,
    subcommand: 0x02,
    write_param: 0x00,
    field: "ENABLE",
    bits: BitField::new(16, 16),
    description: "SST-TF is enabled. Can only be enabled while SST::COREPRIORITY_ENABLE:ENABLE is set.",
    read_subcommand: 0x01,
    read_request_data: 0x00,
};

const COREPRIORITY_ENABLE: MboxControlDef = MboxControlDef {
    name: "SST::COREPRIORITY_ENABLE",
    command: CORE_PRIORITY,
    subcommand: 0x02,
    write_param: 0x100,
    field: "ENABLE",
    bits: BitField::new(1, 1),
    description: "SST-CP is enabled. Can only be disabled while SST::TURBO_ENABLE:ENABLE is clear.",
    read_subcommand: 0x02,
    read_request_data: 0x00,
};

struct MmioField {
    name: &'static str,
    bits: BitField,
    /// Control value to register units; signals use the reciprocal
    multiplier: f64,
    units: Units,
    description: String,
}

struct MmioDef {
    name: String,
    domain: Domain,
    offset: u32,
    fields: Vec<MmioField>,
}

impl MmioDef {
    fn read_mask(&self) -> u64 {
        self.fields.iter().fold(0, |mask, f| mask | f.bits.mask())
    }
}

fn mmio_defs() -> Vec<MmioDef> {
    let mut defs: Vec<MmioDef> = (0..4u32)
        .map(|level| MmioDef {
            name: format!("SST::COREPRIORITY:{}", level),
            domain: Domain::Package,
            offset: 0x08 + level * 4,
            fields: vec![
                MmioField {
                    name: "PRIORITY",
                    bits: BitField::new(4, 7),
                    multiplier: 15.0,
                    units: Units::None,
                    description: format!(
                        "Proportional priority for core priority level {}, ranging from 0 to 1. \
                         A lower value indicates a desire to receive a greater share of surplus \
                         power than priority groups with a higher value.",
                        level
                    ),
                },
                MmioField {
                    name: "FREQUENCY_MIN",
                    bits: BitField::new(8, 15),
                    multiplier: 1e-8,
                    units: Units::Hertz,
                    description: format!("Minimum frequency of core priority level {}", level),
                },
                MmioField {
                    name: "FREQUENCY_MAX",
                    bits: BitField::new(16, 23),
                    multiplier: 1e-8,
                    units: Units::Hertz,
                    description: format!("Maximum frequency of core priority level {}", level),
                },
            ],
        })
        .collect();
    // Offset is per core: base + 4 * punit core id
    defs.push(MmioDef {
        name: "SST::COREPRIORITY".to_string(),
        domain: Domain::Core,
        offset: 0x20,
        fields: vec![MmioField {
            name: "ASSOCIATION",
            bits: BitField::new(16, 17),
            multiplier: 1.0,
            units: Units::None,
            description: "Assigned core priority level".to_string(),
        }],
    });
    defs
}

/// `current` restricted to `read_mask` with `field` set to `value`
fn merge(current: u32, read_mask: u64, field: BitField, value: f64) -> u32 {
    let raw = value.round().max(0.0) as u64;
    field.insert(u64::from(current) & read_mask, raw) as u32
}

/// Mailbox field control
struct SstMboxControl {
    batch: Rc<SstBatch>,
    cpu: usize,
    command: u16,
    subcommand: u16,
    write_param: u32,
    field: BitField,
    read_request: SstRequest,
    read_mask: u64,
}

impl ControlSink for SstMboxControl {
    fn write(&mut self, value: f64) -> Result<(), PlatformError> {
        let current = self.batch.read_once(self.read_request)?;
        let data = merge(current, self.read_mask, self.field, value);
        self.batch
            .io()
            .write_mbox(self.cpu, self.command, self.subcommand, self.write_param, data)?;
        Ok(())
    }

    fn read(&self) -> Option<Result<f64, PlatformError>> {
        Some(
            self.batch
                .read_once(self.read_request)
                .map(|word| self.field.extract(u64::from(word)) as f64)
                .map_err(PlatformError::from),
        )
    }
}

/// MMIO field control
struct SstMmioControl {
    batch: Rc<SstBatch>,
    cpu: usize,
    offset: u32,
    field: BitField,
    multiplier: f64,
    read_mask: u64,
}

impl SstMmioControl {
    fn request(&self) -> SstRequest {
        SstRequest::Mmio {
            cpu: self.cpu,
            offset: self.offset,
        }
    }
}

impl ControlSink for SstMmioControl {
    fn write(&mut self, value: f64) -> Result<(), PlatformError> {
        let current = self.batch.read_once(self.request())?;
        let word = merge(current, self.read_mask, self.field, value * self.multiplier);
        self.batch.io().write_mmio(self.cpu, self.offset, word)?;
        Ok(())
    }

    fn read(&self) -> Option<Result<f64, PlatformError>> {
        Some(
            self.batch
                .read_once(self.request())
                .map(|word| self.field.extract(u64::from(word)) as f64 / self.multiplier)
                .map_err(PlatformError::from),
        )
    }
}

/// Intel Speed Select Technology signals and controls
pub struct SstIoGroup {
    registry: BatchRegistry,
}

impl SstIoGroup {
    pub const NAME: &'static str = "SST";

    /// Build the tables and check core priority association on every core
    pub fn new(topo: &PlatformTopo, io: Rc<dyn SstIo>) -> Result<Self, PlatformError> {
        let batch = Rc::new(SstBatch::new(io));
        let registry = BatchRegistry::new().with_transport(Box::new(SharedBatch(Rc::clone(&batch))));
        let mut builder = Builder {
            topo,
            batch,
            registry,
        };

        for def in MBOX_SIGNALS {
            builder.add_mbox_signals(def.name, def.command, def.subcommand, def.fields, Behavior::Constant)?;
        }

        let tf = builder.add_mbox_control(&TURBO_ENABLE)?;
        let cp = builder.add_mbox_control(&COREPRIORITY_ENABLE)?;
        // The driver rejects enabling TF while CP is off and disabling CP while TF is on
        for (&tf_id, &cp_id) in tf.iter().zip(&cp) {
            builder.registry.set_write_dependency(
                tf_id,
                WriteDependency::new(cp_id, Trigger::Equals(1.0), Requirement::Equals(1.0)),
            )?;
            builder.registry.set_write_dependency(
                cp_id,
                WriteDependency::new(tf_id, Trigger::Equals(0.0), Requirement::Equals(0.0)),
            )?;
        }

        for def in mmio_defs() {
            builder.add_mmio(&def)?;
        }

        let group = Self {
            registry: builder.registry,
        };
        for core in 0..topo.num_domain(Domain::Core) {
            group
                .registry
                .read_signal("SST::COREPRIORITY:ASSOCIATION", Domain::Core, core)?;
        }
        log::debug!(
            "SST IoGroup: {} signals, {} controls",
            group.registry.signal_names().len(),
            group.registry.control_names().len()
        );
        Ok(group)
    }
}

struct Builder<'a> {
    topo: &'a PlatformTopo,
    batch: Rc<SstBatch>,
    registry: BatchRegistry,
}

impl Builder<'_> {
    fn cpus(&self, domain: Domain) -> Result<Vec<usize>, PlatformError> {
        (0..self.topo.num_domain(domain))
            .map(|idx| self.topo.first_cpu(domain, idx).map_err(PlatformError::from))
            .collect()
    }

    fn register(&self, request: SstRequest) -> SstRegister {
        SstRegister::new(Rc::clone(&self.batch), request)
    }

    fn add_mbox_signals(
        &mut self,
        raw_name: &str,
        command: u16,
        subcommand: u16,
        fields: &[MboxField],
        behavior: Behavior,
    ) -> Result<(), PlatformError> {
        let cpus = self.cpus(Domain::Package)?;
        for f in fields {
            let request = |cpu: usize| SstRequest::Mbox {
                cpu,
                command,
                subcommand,
                request_data: f.request_data,
            };
            let raw_signal = format!("{}_0x{:05x}#", raw_name, f.request_data);
            if !self.registry.is_valid_signal(&raw_signal) {
                let sources = cpus
                    .iter()
                    .map(|&cpu| Box::new(RawSignal::new(self.register(request(cpu)))) as Box<dyn SignalSource>)
                    .collect();
                let info = SignalInfo::new(Domain::Package, f.units, f.aggregation, behavior, f.description)
                    .with_format(Format::Hex);
                self.registry.add_signal(&raw_signal, info, sources)?;
            }
            let sources = cpus
                .iter()
                .map(|&cpu| {
                    Box::new(FieldSignal::new(self.register(request(cpu)), f.bits, f.multiplier))
                        as Box<dyn SignalSource>
                })
                .collect();
            let info = SignalInfo::new(Domain::Package, f.units, f.aggregation, behavior, f.description);
            self.registry
                .add_signal(&format!("{}:{}", raw_name, f.name), info, sources)?;
        }
        Ok(())
    }

    fn add_mbox_control(
        &mut self,
        def: &MboxControlDef,
    ) -> Result<Vec<ControlId>, PlatformError> {
        let readback = [MboxField {
            name: def.field,
            request_data: def.read_request_data,
            bits: def.bits,
            multiplier: 1.0,
            units: Units::None,
            aggregation: Aggregation::Sum,
            description: def.description,
        }];
        self.add_mbox_signals(def.name, def.command, def.read_subcommand, &readback, Behavior::Variable)?;

        let sinks = self
            .cpus(Domain::Package)?
            .into_iter()
            .map(|cpu| {
                Box::new(SstMboxControl {
                    batch: Rc::clone(&self.batch),
                    cpu,
                    command: def.command,
                    subcommand: def.subcommand,
                    write_param: def.write_param,
                    field: def.bits,
                    read_request: SstRequest::Mbox {
                        cpu,
                        command: def.command,
                        subcommand: def.read_subcommand,
                        request_data: def.read_request_data,
                    },
                    read_mask: def.bits.mask(),
                }) as Box<dyn ControlSink>
            })
            .collect();
        let info = ControlInfo::new(Domain::Package, Units::None, Aggregation::Sum, def.description)
            .immediate_only();
        self.registry
            .add_control(&format!("{}:{}", def.name, def.field), info, sinks)
    }

    fn add_mmio(&mut self, def: &MmioDef) -> Result<(), PlatformError> {
        let mut targets = Vec::new();
        for cpu in self.cpus(def.domain)? {
            let offset = match def.domain {
                Domain::Core => def.offset + self.batch.io().punit_core(cpu)? * 4,
                _ => def.offset,
            };
            targets.push((cpu, offset));
        }
        let read_mask = def.read_mask();

        let raw_signal = format!("{}_0x{:05x}#", def.name, def.offset);
        for f in &def.fields {
            if !self.registry.is_valid_signal(&raw_signal) {
                let sources = targets
                    .iter()
                    .map(|&(cpu, offset)| {
                        Box::new(RawSignal::new(self.register(SstRequest::Mmio { cpu, offset })))
                            as Box<dyn SignalSource>
                    })
                    .collect();
                let info = SignalInfo::new(
                    def.domain,
                    f.units,
                    Aggregation::ExpectSame,
                    Behavior::Variable,
                    f.description.clone(),
                )
                .with_format(Format::Hex);
                self.registry.add_signal(&raw_signal, info, sources)?;
            }

            let name = format!("{}:{}", def.name, f.name);
            let sources = targets
                .iter()
                .map(|&(cpu, offset)| {
                    Box::new(FieldSignal::new(
                        self.register(SstRequest::Mmio { cpu, offset }),
                        f.bits,
                        1.0 / f.multiplier,
                    )) as Box<dyn SignalSource>
                })
                .collect();
            let info = SignalInfo::new(
                def.domain,
                f.units,
                Aggregation::ExpectSame,
                Behavior::Variable,
                f.description.clone(),
            );
            self.registry.add_signal(&name, info, sources)?;

            let sinks = targets
                .iter()
                .map(|&(cpu, offset)| {
                    Box::new(SstMmioControl {
                        batch: Rc::clone(&self.batch),
                        cpu,
                        offset,
                        field: f.bits,
                        multiplier: f.multiplier,
                        read_mask,
                    }) as Box<dyn ControlSink>
                })
                .collect();
            let info = ControlInfo::new(def.domain, f.units, Aggregation::ExpectSame, f.description.clone());
            self.registry.add_control(&name, info, sinks)?;
        }
        Ok(())
    }
}

impl IoGroup for SstIoGroup {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut BatchRegistry {
        &mut self.registry
    }
}
