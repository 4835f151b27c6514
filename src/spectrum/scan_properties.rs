use log::warn;

use crate::impl_param_described;
use crate::params::{ControlledVocabulary, Param, ParamList};

/// How the bounds of an isolation window were established from the source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsolationWindowState {
    #[default]
    Unknown = 0,
    Offset,
    Explicit,
    Complete,
}

/// The interval around the precursor ion that was isolated in the precursor scan.
/// Although an isolation window may be specified either with explicit bounds or
/// offsets from the target, this data structure always uses explicit bounds.
#[derive(Default, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsolationWindow {
    pub target: f32,
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub flags: IsolationWindowState,
}

impl PartialEq for IsolationWindow {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
            && self.lower_bound == other.lower_bound
            && self.upper_bound == other.upper_bound
    }
}

impl IsolationWindow {
    pub fn new(target: f32, lower_bound: f32, upper_bound: f32) -> Self {
        Self {
            target,
            lower_bound,
            upper_bound,
            flags: IsolationWindowState::Complete,
        }
    }

    pub fn around(target: f32, width: f32) -> Self {
        let half = width / 2.0;
        Self {
            target,
            lower_bound: target - half,
            upper_bound: target + half,
            flags: IsolationWindowState::Offset,
        }
    }

    pub fn lower_offset(&self) -> f32 {
        self.target - self.lower_bound
    }

    pub fn upper_offset(&self) -> f32 {
        self.upper_bound - self.target
    }

    pub fn width(&self) -> f32 {
        self.upper_bound - self.lower_bound
    }

    /// Whether `mz` falls within the window, bounds included
    pub fn contains(&self, mz: f64) -> bool {
        let mz = mz as f32;
        self.lower_bound <= mz && mz <= self.upper_bound
    }

    /// A window with no width isolates nothing
    pub fn is_empty(&self) -> bool {
        self.upper_bound <= self.lower_bound
    }
}

/// The isolation window terms as they were found in the file, before they
/// are reconciled into an [`IsolationWindow`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct IsolationWindowTerms {
    pub target: Option<f32>,
    pub lower_offset: Option<f32>,
    pub upper_offset: Option<f32>,
    pub lower_limit: Option<f32>,
    pub upper_limit: Option<f32>,
}

impl IsolationWindowTerms {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn has_offsets(&self) -> bool {
        self.lower_offset.is_some() || self.upper_offset.is_some()
    }

    /// Turn the collected terms into explicit bounds. Offsets are measured
    /// from the target, falling back to `selected_mz` when the file gave no
    /// target. Explicit limits without a target use their midpoint.
    pub fn resolve(&self, spectrum_id: &str, selected_mz: Option<f64>) -> Option<IsolationWindow> {
        if self.is_empty() {
            return None;
        }
        let midpoint = match (self.lower_limit, self.upper_limit) {
            (Some(lo), Some(hi)) => Some((lo + hi) / 2.0),
            _ => None,
        };
        let flags = match (self.target.is_some(), midpoint.is_some(), self.has_offsets()) {
            (true, true, _) | (true, false, false) => IsolationWindowState::Complete,
            (_, true, _) => IsolationWindowState::Explicit,
            (_, _, true) => IsolationWindowState::Offset,
            _ => IsolationWindowState::Unknown,
        };
        let target = self.target.or(midpoint).or_else(|| {
            if self.has_offsets() {
                selected_mz.map(|mz| mz as f32)
            } else {
                None
            }
        });
        let Some(target) = target else {
            warn!("Dropping isolation window of {spectrum_id}, it has no target m/z and no selected ion to anchor it: {self:?}");
            return None;
        };
        Some(IsolationWindow {
            target,
            lower_bound: self
                .lower_limit
                .unwrap_or(target - self.lower_offset.unwrap_or_default()),
            upper_bound: self
                .upper_limit
                .unwrap_or(target + self.upper_offset.unwrap_or_default()),
            flags,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanWindow {
    pub lower_bound: f32,
    pub upper_bound: f32,
}

pub type ScanWindowList = Vec<ScanWindow>;

/// Describes a single scan event. Unless additional post-processing is done,
/// there is usually only one event per spectrum.
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanEvent {
    /// Scan start time in minutes
    pub start_time: Option<f64>,
    /// Ion injection time in milliseconds
    pub injection_time: Option<f32>,
    pub scan_windows: ScanWindowList,
    pub instrument_configuration_id: Option<String>,
    pub params: ParamList,
}

pub type ScanEventList = Vec<ScanEvent>;

/// Describe the series of acquisition events that constructed the spectrum
/// being described.
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Acquisition {
    pub scans: ScanEventList,
    pub params: ParamList,
}

impl Acquisition {
    pub fn first_scan(&self) -> Option<&ScanEvent> {
        self.scans.first()
    }

    pub fn first_scan_mut(&mut self) -> Option<&mut ScanEvent> {
        if self.scans.is_empty() {
            self.scans.push(ScanEvent::default());
        }
        self.scans.first_mut()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.first_scan().and_then(|s| s.start_time)
    }
}

/// Describes a single selected ion from a precursor isolation
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectedIon {
    /// The selected ion's m/z as reported, may not be the monoisotopic peak.
    pub mz: Option<f64>,
    pub intensity: Option<f32>,
    pub charge: Option<i32>,
    pub params: ParamList,
}

impl SelectedIon {
    /// The point measure of ion mobility recorded for this ion, either as an
    /// inverse reduced ion mobility or as a drift time
    pub fn ion_mobility(&self) -> Option<f64> {
        self.params
            .iter()
            .filter(|p| p.is_ms())
            .find(|p| matches!(p.accession, Some(1002815 | 1002476)))
            .and_then(|p| p.to_f64().ok())
    }

    pub fn has_ion_mobility(&self) -> bool {
        self.ion_mobility().is_some()
    }
}

/// Describes the activation method(s) used to dissociate the precursor ion
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Activation {
    pub methods: Vec<Param>,
    pub energy: Option<f32>,
    pub params: ParamList,
}

impl Activation {
    pub fn method(&self) -> Option<&Param> {
        self.methods.first()
    }

    /// More than one dissociation method was applied, e.g. EThcD
    pub fn is_combined(&self) -> bool {
        self.methods.len() > 1
    }

    pub fn is_param_activation(p: &Param) -> bool {
        match (p.controlled_vocabulary, p.accession) {
            (Some(ControlledVocabulary::MS), Some(acc)) => Self::accession_to_activation(acc),
            _ => false,
        }
    }

    pub const fn accession_to_activation(accession: u32) -> bool {
        matches!(
            accession,
            1000133
                | 1000134
                | 1000135
                | 1000136
                | 1000242
                | 1000250
                | 1000262
                | 1000282
                | 1000422
                | 1000433
                | 1000435
                | 1000598
                | 1000599
                | 1001880
                | 1002000
                | 1002472
                | 1002481
                | 1002631
                | 1002678
                | 1002679
                | 1003181
                | 1003182
                | 1003246
                | 1003247
                | 1003294
        )
    }
}

/// Describes the precursor ion of the owning spectrum.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Precursor {
    pub ions: Vec<SelectedIon>,
    pub isolation_window: Option<IsolationWindow>,
    /// The precursor scan's native ID, if given
    pub precursor_id: Option<String>,
    pub activation: Activation,
    pub params: ParamList,
}

impl Precursor {
    pub fn ions(&self) -> &[SelectedIon] {
        &self.ions
    }

    pub fn ion(&self) -> Option<&SelectedIon> {
        self.ions.first()
    }

    /// The m/z of the first selected ion, absent when none was recorded
    pub fn selected_mz(&self) -> Option<f64> {
        self.ion().and_then(|i| i.mz)
    }

    pub fn selected_charge(&self) -> Option<i32> {
        self.ion().and_then(|i| i.charge)
    }

    pub fn selected_intensity(&self) -> Option<f32> {
        self.ion().and_then(|i| i.intensity)
    }

    /// The ion mobility of the first selected ion, absent when none was recorded
    pub fn selected_ion_mobility(&self) -> Option<f64> {
        self.ion().and_then(|i| i.ion_mobility())
    }

    pub fn isolation_window(&self) -> Option<&IsolationWindow> {
        self.isolation_window.as_ref()
    }

    pub fn precursor_id(&self) -> Option<&str> {
        self.precursor_id.as_deref()
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }
}

/// Describes the polarity of a mass spectrum. `Unknown` is the default.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanPolarity {
    #[default]
    Unknown = 0,
    Positive = 1,
    Negative = -1,
}

/// Describes the initial representation of the signal of a spectrum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalContinuity {
    #[default]
    Unknown = 0,
    Centroid = 3,
    Profile = 5,
}

/// The descriptive metadata of a spectrum, everything but its signal arrays
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumDescription {
    pub id: String,
    pub index: usize,
    pub ms_level: u8,

    pub polarity: ScanPolarity,
    pub signal_continuity: SignalContinuity,

    pub params: ParamList,
    pub acquisition: Acquisition,
    pub precursor: Option<Precursor>,
}

impl_param_described!(
    Acquisition,
    Activation,
    Precursor,
    SelectedIon,
    ScanEvent,
    SpectrumDescription
);
