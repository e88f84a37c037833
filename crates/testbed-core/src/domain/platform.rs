//! Target platform tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform/configuration tag carried by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestPlatform {
    None,
    All,

    #[serde(rename = "iOS")]
    Ios,
    #[serde(rename = "iOS_Unified")]
    IosUnified,
    #[serde(rename = "iOS_Unified32")]
    IosUnified32,
    #[serde(rename = "iOS_Unified64")]
    IosUnified64,
    #[serde(rename = "iOS_TodayExtension64")]
    IosTodayExtension64,
    #[serde(rename = "tvOS")]
    TvOs,
    #[serde(rename = "watchOS")]
    WatchOs,

    Mac,
    #[serde(rename = "Mac_Classic")]
    MacClassic,
    #[serde(rename = "Mac_Unified")]
    MacUnified,
    #[serde(rename = "Mac_UnifiedXM45")]
    MacUnifiedXm45,
    #[serde(rename = "Mac_Unified32")]
    MacUnified32,
    #[serde(rename = "Mac_UnifiedXM45_32")]
    MacUnifiedXm45_32,
    #[serde(rename = "Mac_UnifiedSystem")]
    MacUnifiedSystem,
}

/// Platform family used by the select/deselect categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Ios,
    TvOs,
    WatchOs,
    Mac,
    Other,
}

impl TestPlatform {
    pub fn family(self) -> PlatformFamily {
        use TestPlatform::*;
        match self {
            Ios | IosUnified | IosUnified32 | IosUnified64 | IosTodayExtension64 => {
                PlatformFamily::Ios
            }
            TvOs => PlatformFamily::TvOs,
            WatchOs => PlatformFamily::WatchOs,
            Mac | MacClassic | MacUnified | MacUnifiedXm45 | MacUnified32 | MacUnifiedXm45_32
            | MacUnifiedSystem => PlatformFamily::Mac,
            None | All => PlatformFamily::Other,
        }
    }

    /// Mac builds can run next to each other; device SDK builds cannot.
    pub fn supports_parallel_build(self) -> bool {
        self.family() == PlatformFamily::Mac
    }

    /// Human readable mode shown in a test path ("iOS Unified 64-bits").
    pub fn mode_label(self) -> String {
        use TestPlatform::*;
        match self {
            IosUnified32 => "iOS Unified 32-bits".to_string(),
            IosUnified64 => "iOS Unified 64-bits".to_string(),
            IosTodayExtension64 => "iOS Unified Today Extension 64-bits".to_string(),
            IosUnified => "iOS Unified".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for TestPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TestPlatform::*;
        let s = match self {
            None => "None",
            All => "All",
            Ios => "iOS",
            IosUnified => "iOS_Unified",
            IosUnified32 => "iOS_Unified32",
            IosUnified64 => "iOS_Unified64",
            IosTodayExtension64 => "iOS_TodayExtension64",
            TvOs => "tvOS",
            WatchOs => "watchOS",
            Mac => "Mac",
            MacClassic => "Mac_Classic",
            MacUnified => "Mac_Unified",
            MacUnifiedXm45 => "Mac_UnifiedXM45",
            MacUnified32 => "Mac_Unified32",
            MacUnifiedXm45_32 => "Mac_UnifiedXM45_32",
            MacUnifiedSystem => "Mac_UnifiedSystem",
        };
        f.write_str(s)
    }
}
