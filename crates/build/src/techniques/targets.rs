//! Render target registry
//!
//! Declares the off-screen targets a technique renders into. The two default
//! targets produced by the host's base render, `COLOR` and `DEPTH`, are
//! pre-registered in every registry and can be read or written by passes but
//! never redefined.

use crate::TechniqueError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the default color target
pub const COLOR: &str = "COLOR";
/// Name of the default depth target
pub const DEPTH: &str = "DEPTH";

/// Whether a target stores color or depth values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Color target
    Color,
    /// Depth target
    Depth,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color => write!(f, "color"),
            Self::Depth => write!(f, "depth"),
        }
    }
}

/// Pixel format of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetFormat {
    /// 8-bit RGB, stored with an opaque alpha channel
    Rgb8,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit single channel
    R8,
    /// 8-bit two channel
    Rg8,
    /// 16-bit float single channel
    R16Float,
    /// 16-bit float two channel
    Rg16Float,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float single channel
    R32Float,
    /// 32-bit float two channel
    Rg32Float,
    /// 32-bit float RGBA
    Rgba32Float,
    /// 16-bit normalized depth
    Depth16,
    /// At least 24-bit depth
    Depth24,
    /// 32-bit float depth
    Depth32Float,
    /// 24-bit depth with 8-bit stencil
    Depth24Stencil8,
}

impl TargetFormat {
    const NAMES: [(&'static str, TargetFormat); 15] = [
        ("rgb", Self::Rgb8),
        ("rgba", Self::Rgba8),
        ("rgba8", Self::Rgba8),
        ("r8", Self::R8),
        ("rg8", Self::Rg8),
        ("r16f", Self::R16Float),
        ("rg16f", Self::Rg16Float),
        ("rgba16f", Self::Rgba16Float),
        ("r32f", Self::R32Float),
        ("rg32f", Self::Rg32Float),
        ("rgba32f", Self::Rgba32Float),
        ("depth16", Self::Depth16),
        ("depth24", Self::Depth24),
        ("depth32f", Self::Depth32Float),
        ("depth24stencil8", Self::Depth24Stencil8),
    ];

    /// Returns the kind of target this format can back
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Depth16 | Self::Depth24 | Self::Depth32Float | Self::Depth24Stencil8 => TargetKind::Depth,
            _ => TargetKind::Color,
        }
    }

    /// Returns the default format for a target kind
    pub fn default_for(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Color => Self::Rgba8,
            TargetKind::Depth => Self::Depth32Float,
        }
    }

    /// Number of color components stored per pixel
    pub fn components(&self) -> u32 {
        match self {
            Self::R8 | Self::R16Float | Self::R32Float => 1,
            Self::Rg8 | Self::Rg16Float | Self::Rg32Float => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Rgba16Float | Self::Rgba32Float => 4,
            _ => 1,
        }
    }

    /// Returns true if the format can be sampled with linear filtering
    pub fn is_filterable(&self) -> bool {
        !matches!(self, Self::R32Float | Self::Rg32Float | Self::Rgba32Float) && self.kind() == TargetKind::Color
    }
}

impl FromStr for TargetFormat {
    type Err = TechniqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, format)| *format)
            .ok_or_else(|| TechniqueError::invalid_value("format", s, "unknown target format"))
    }
}

/// Pixel dimensions of a surface or target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Extent {
    type Err = TechniqueError;

    /// Parses sizes written as `"WIDTHxHEIGHT"`, e.g. `"512x512"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s.split_once('x').ok_or_else(|| TechniqueError::invalid_value("size", s, "expected WIDTHxHEIGHT"))?;
        let width = width.trim().parse::<u32>().map_err(|_| TechniqueError::invalid_value("size", s, "invalid width"))?;
        let height = height.trim().parse::<u32>().map_err(|_| TechniqueError::invalid_value("size", s, "invalid height"))?;
        Ok(Self { width, height })
    }
}

/// Scale factor of a target relative to the host surface
///
/// Accepts decimal values (`1.0`, `"0.5"`) as well as fractions (`"1/2"`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    /// Unit scale, the size of the surface itself
    pub const ONE: ScaleFactor = ScaleFactor(1.0);

    /// Creates a scale factor, rejecting non-finite and non-positive values
    pub fn new(value: f64) -> Result<Self, ScaleFactorParseError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ScaleFactorParseError::NotPositive);
        }
        Ok(Self(value))
    }

    /// Converts the scale factor to a floating-point value
    pub fn to_f64(&self) -> f64 {
        self.0
    }

    /// Returns true if this scale factor equals 1.0 (no scaling)
    pub fn is_unity(&self) -> bool {
        self.0 == 1.0
    }

    /// Applies the factor to a pixel dimension, never going below one pixel
    pub fn apply(&self, dimension: u32) -> u32 {
        ((dimension as f64 * self.0).floor() as u32).max(1)
    }
}

impl FromStr for ScaleFactor {
    type Err = ScaleFactorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((numerator, denominator)) = s.split_once('/') {
            let numerator = numerator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
            let denominator = denominator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidDenominator)?;
            if denominator == 0 {
                return Err(ScaleFactorParseError::ZeroDenominator);
            }
            Self::new(numerator as f64 / denominator as f64)
        } else {
            let value = s.trim().parse::<f64>().map_err(|_| ScaleFactorParseError::InvalidFormat)?;
            Self::new(value)
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ScaleFactor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Number(value) => ScaleFactor::new(value),
            Raw::Text(text) => text.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// Error types for scale factor parsing
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleFactorParseError {
    /// The text is neither a number nor a fraction
    InvalidFormat,
    /// The numerator is not a valid integer
    InvalidNumerator,
    /// The denominator is not a valid integer
    InvalidDenominator,
    /// The denominator is zero (division by zero)
    ZeroDenominator,
    /// The value is zero, negative or not finite
    NotPositive,
}

impl fmt::Display for ScaleFactorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "Invalid scale factor format"),
            Self::InvalidNumerator => write!(f, "Invalid numerator"),
            Self::InvalidDenominator => write!(f, "Invalid denominator"),
            Self::ZeroDenominator => write!(f, "Denominator cannot be zero"),
            Self::NotPositive => write!(f, "Scale factor must be finite and greater than zero"),
        }
    }
}

impl std::error::Error for ScaleFactorParseError {}

/// How the pixel size of a target is determined
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SizePolicy {
    /// Absolute pixel size, independent of the surface
    Fixed(Extent),
    /// Proportional to the current surface size
    Scaled(ScaleFactor),
}

impl SizePolicy {
    /// Computes the pixel size for the given surface size
    pub fn extent(&self, surface: Extent) -> Extent {
        match self {
            Self::Fixed(extent) => *extent,
            Self::Scaled(factor) => Extent::new(factor.apply(surface.width), factor.apply(surface.height)),
        }
    }

    /// Returns true if the size follows the surface
    pub fn tracks_surface(&self) -> bool {
        matches!(self, Self::Scaled(_))
    }
}

/// Full description of a render target
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetDescriptor {
    pub kind: TargetKind,
    pub format: TargetFormat,
    pub size: SizePolicy,
}

impl TargetDescriptor {
    /// Descriptor of the default `COLOR` target
    pub const DEFAULT_COLOR: TargetDescriptor = TargetDescriptor {
        kind: TargetKind::Color,
        format: TargetFormat::Rgba8,
        size: SizePolicy::Scaled(ScaleFactor::ONE),
    };

    /// Descriptor of the default `DEPTH` target
    pub const DEFAULT_DEPTH: TargetDescriptor = TargetDescriptor {
        kind: TargetKind::Depth,
        format: TargetFormat::Depth32Float,
        size: SizePolicy::Scaled(ScaleFactor::ONE),
    };
}

/// Where a target lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetSlot {
    /// The host's `COLOR` target
    DefaultColor,
    /// The host's `DEPTH` target
    DefaultDepth,
    /// A target the technique allocates itself
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RegisteredTarget {
    descriptor: TargetDescriptor,
    slot: TargetSlot,
}

/// Registry of every target a technique may reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRegistry {
    targets: BTreeMap<String, RegisteredTarget>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetRegistry {
    /// Creates a registry holding only the default targets
    pub fn new() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(
            COLOR.to_string(),
            RegisteredTarget {
                descriptor: TargetDescriptor::DEFAULT_COLOR,
                slot: TargetSlot::DefaultColor,
            },
        );
        targets.insert(
            DEPTH.to_string(),
            RegisteredTarget {
                descriptor: TargetDescriptor::DEFAULT_DEPTH,
                slot: TargetSlot::DefaultDepth,
            },
        );
        Self { targets }
    }

    /// Declares a custom target
    ///
    /// # Errors
    /// * [`TechniqueError::ReservedName`] if `name` is `COLOR` or `DEPTH`
    /// * [`TechniqueError::InvalidTarget`] if the format does not fit the kind or the size is empty
    /// * [`TechniqueError::DuplicateTarget`] if `name` exists with another descriptor
    pub fn define_target(&mut self, name: &str, kind: TargetKind, format: TargetFormat, size: SizePolicy) -> Result<(), TechniqueError> {
        if let Some(existing) = self.targets.get(name) {
            if existing.slot != TargetSlot::Custom {
                return Err(TechniqueError::ReservedName(name.to_string()));
            }
        }

        if format.kind() != kind {
            return Err(TechniqueError::InvalidTarget {
                target: name.to_string(),
                reason: format!("format {format:?} cannot back a {kind} target"),
            });
        }
        if let SizePolicy::Fixed(extent) = size {
            if extent.width == 0 || extent.height == 0 {
                return Err(TechniqueError::InvalidTarget {
                    target: name.to_string(),
                    reason: format!("size {extent} has a zero dimension"),
                });
            }
        }

        let descriptor = TargetDescriptor { kind, format, size };
        match self.targets.get(name) {
            Some(existing) if existing.descriptor == descriptor => Ok(()),
            Some(_) => Err(TechniqueError::DuplicateTarget(name.to_string())),
            None => {
                self.targets.insert(name.to_string(), RegisteredTarget { descriptor, slot: TargetSlot::Custom });
                Ok(())
            }
        }
    }

    /// Looks up a target by name
    pub fn get(&self, name: &str) -> Option<&TargetDescriptor> {
        self.targets.get(name).map(|target| &target.descriptor)
    }

    /// Resolves a target referenced by a pass
    ///
    /// # Errors
    /// [`TechniqueError::UnresolvedBinding`] naming the pass and the target
    pub fn resolve(&self, pass: &str, name: &str) -> Result<&TargetDescriptor, TechniqueError> {
        self.get(name).ok_or_else(|| TechniqueError::unresolved(pass, name))
    }

    /// Returns true if a target with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Returns true if `name` is one of the default targets
    pub fn is_default(&self, name: &str) -> bool {
        self.slot(name).is_some_and(|slot| slot != TargetSlot::Custom)
    }

    /// Run-time location of a target, if it exists
    pub fn slot(&self, name: &str) -> Option<TargetSlot> {
        self.targets.get(name).map(|target| target.slot)
    }

    /// Iterates over user-defined targets in name order
    pub fn custom_targets(&self) -> impl Iterator<Item = (&str, &TargetDescriptor)> {
        self.targets.iter().filter(|(_, target)| target.slot == TargetSlot::Custom).map(|(name, target)| (name.as_str(), &target.descriptor))
    }

    /// Iterates over all targets, defaults included
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetDescriptor)> {
        self.targets.iter().map(|(name, target)| (name.as_str(), &target.descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_factor_parsing() {
        assert_eq!("1".parse::<ScaleFactor>().unwrap(), ScaleFactor::ONE);
        assert_eq!("0.5".parse::<ScaleFactor>().unwrap().to_f64(), 0.5);
        assert_eq!("1/2".parse::<ScaleFactor>().unwrap().to_f64(), 0.5);
        assert_eq!("3/4".parse::<ScaleFactor>().unwrap().to_f64(), 0.75);

        assert_eq!("1/0".parse::<ScaleFactor>().unwrap_err(), ScaleFactorParseError::ZeroDenominator);
        assert_eq!("0".parse::<ScaleFactor>().unwrap_err(), ScaleFactorParseError::NotPositive);
        assert_eq!("-2".parse::<ScaleFactor>().unwrap_err(), ScaleFactorParseError::NotPositive);
        assert_eq!("invalid".parse::<ScaleFactor>().unwrap_err(), ScaleFactorParseError::InvalidFormat);
    }

    #[test]
    fn test_scale_factor_deserializes_numbers_and_strings() {
        let number: ScaleFactor = serde_json::from_str("1.0").unwrap();
        let fraction: ScaleFactor = serde_json::from_str("\"1/4\"").unwrap();
        assert!(number.is_unity());
        assert_eq!(fraction.to_f64(), 0.25);
        assert!(serde_json::from_str::<ScaleFactor>("0.0").is_err());
    }

    #[test]
    fn test_size_policy_extent() {
        let surface = Extent::new(1280, 721);
        assert_eq!(SizePolicy::Fixed(Extent::new(512, 512)).extent(surface), Extent::new(512, 512));
        assert_eq!(SizePolicy::Scaled(ScaleFactor::ONE).extent(surface), surface);
        assert_eq!(SizePolicy::Scaled("1/2".parse().unwrap()).extent(surface), Extent::new(640, 360));
        // Never collapses to zero pixels
        assert_eq!(SizePolicy::Scaled("1/4".parse().unwrap()).extent(Extent::new(2, 2)), Extent::new(1, 1));
    }

    #[test]
    fn test_extent_parsing() {
        assert_eq!("512x512".parse::<Extent>().unwrap(), Extent::new(512, 512));
        assert_eq!("1920x1080".parse::<Extent>().unwrap(), Extent::new(1920, 1080));
        assert!("512".parse::<Extent>().is_err());
        assert!("axb".parse::<Extent>().is_err());
    }

    #[test]
    fn test_defaults_are_preregistered() {
        let registry = TargetRegistry::new();
        assert_eq!(registry.get(COLOR), Some(&TargetDescriptor::DEFAULT_COLOR));
        assert_eq!(registry.get(DEPTH), Some(&TargetDescriptor::DEFAULT_DEPTH));
        assert!(registry.is_default(COLOR));
        assert_eq!(registry.slot(COLOR), Some(TargetSlot::DefaultColor));
        assert_eq!(registry.slot(DEPTH), Some(TargetSlot::DefaultDepth));
        assert_eq!(registry.slot("NORMALS"), None);
        assert_eq!(registry.custom_targets().count(), 0);
        assert_eq!(registry.resolve("lines", "NORMALS").unwrap_err(), TechniqueError::unresolved("lines", "NORMALS"));
    }

    #[test]
    fn test_redefining_defaults_is_rejected() {
        let mut registry = TargetRegistry::new();
        let error = registry.define_target(COLOR, TargetKind::Color, TargetFormat::Rgba8, SizePolicy::Scaled(ScaleFactor::ONE)).unwrap_err();
        assert_eq!(error, TechniqueError::ReservedName(COLOR.to_string()));

        let error = registry.define_target(DEPTH, TargetKind::Depth, TargetFormat::Depth24, SizePolicy::Scaled(ScaleFactor::ONE)).unwrap_err();
        assert_eq!(error, TechniqueError::ReservedName(DEPTH.to_string()));

        // Reserved names are matched exactly
        registry.define_target("color", TargetKind::Color, TargetFormat::Rgba8, SizePolicy::Scaled(ScaleFactor::ONE)).unwrap();
    }

    #[test]
    fn test_define_custom_target() {
        let mut registry = TargetRegistry::new();
        registry
            .define_target("NORMALS", TargetKind::Color, TargetFormat::Rgb8, SizePolicy::Fixed(Extent::new(512, 512)))
            .unwrap();

        let custom: Vec<_> = registry.custom_targets().collect();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].0, "NORMALS");
        assert_eq!(custom[0].1.format, TargetFormat::Rgb8);
        assert!(!registry.is_default("NORMALS"));
        assert_eq!(registry.slot("NORMALS"), Some(TargetSlot::Custom));
    }

    #[test]
    fn test_duplicate_custom_target() {
        let mut registry = TargetRegistry::new();
        let size = SizePolicy::Fixed(Extent::new(256, 256));
        registry.define_target("NORMALS", TargetKind::Color, TargetFormat::Rgba8, size).unwrap();
        registry.define_target("NORMALS", TargetKind::Color, TargetFormat::Rgba8, size).unwrap();

        let error = registry.define_target("NORMALS", TargetKind::Color, TargetFormat::Rgba16Float, size).unwrap_err();
        assert_eq!(error, TechniqueError::DuplicateTarget("NORMALS".to_string()));
    }

    #[test]
    fn test_format_must_match_kind() {
        let mut registry = TargetRegistry::new();
        let error = registry
            .define_target("SHADOW", TargetKind::Color, TargetFormat::Depth32Float, SizePolicy::Scaled(ScaleFactor::ONE))
            .unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidTarget { target, .. } if target == "SHADOW"));
    }

    #[test]
    fn test_zero_fixed_size_is_rejected() {
        let mut registry = TargetRegistry::new();
        let error = registry
            .define_target("EMPTY", TargetKind::Color, TargetFormat::Rgba8, SizePolicy::Fixed(Extent::new(0, 64)))
            .unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidTarget { .. }));
    }

    #[test]
    fn test_format_properties() {
        assert_eq!("rgb".parse::<TargetFormat>().unwrap(), TargetFormat::Rgb8);
        assert_eq!("depth24stencil8".parse::<TargetFormat>().unwrap().kind(), TargetKind::Depth);
        assert!(TargetFormat::Rgba16Float.is_filterable());
        assert!(!TargetFormat::R32Float.is_filterable());
        assert!(!TargetFormat::Depth32Float.is_filterable());
        assert!("bgra".parse::<TargetFormat>().is_err());
    }
}
