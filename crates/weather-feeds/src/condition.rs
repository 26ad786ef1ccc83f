//! Mapping of upstream condition vocabularies onto the canonical 48-entry
//! condition taxonomy.

use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::model::{ForecastPeriod, PeriodKind};

pub const UNKNOWN_CODE: i32 = -1;
pub const MAX_CODE: i32 = 47;

const DAY_START_HOUR: u32 = 7;
const DAY_END_HOUR: u32 = 19;
const NIGHT_PREFIX: &str = "nt_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Day,
    Night,
}

impl Phase {
    pub fn from_is_day(is_day: bool) -> Self {
        if is_day { Phase::Day } else { Phase::Night }
    }

    /// Current conditions use the day column unless the caller knows better.
    pub fn from_kind(kind: PeriodKind) -> Self {
        match kind {
            PeriodKind::Night => Phase::Night,
            PeriodKind::Current | PeriodKind::Day => Phase::Day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePair {
    pub day: i32,
    pub night: i32,
}

impl CodePair {
    const UNKNOWN: CodePair = CodePair {
        day: UNKNOWN_CODE,
        night: UNKNOWN_CODE,
    };

    pub fn select(self, phase: Phase) -> i32 {
        match phase {
            Phase::Day => self.day,
            Phase::Night => self.night,
        }
    }
}

/// Textual icon names: the classic icon vocabulary plus the WU names.
pub const ICON_NAMES: &[(&str, i32, i32)] = &[
    ("sunny", 32, 31),
    ("mostly_sunny", 34, 33),
    ("partly_cloudy", 30, 29),
    ("mostly_cloudy", 28, 27),
    ("chance_of_storm", 37, 47),
    ("rain", 12, 12),
    ("chance_of_rain", 39, 45),
    ("chance_of_snow", 41, 46),
    ("cloudy", 26, 26),
    ("mist", 11, 11),
    ("storm", 35, 35),
    ("thunderstorm", 35, 35),
    ("chance_of_tstorm", 37, 47),
    ("sleet", 5, 5),
    ("snow", 16, 16),
    ("icy", 10, 10),
    ("dust", 19, 19),
    ("fog", 20, 20),
    ("smoke", 22, 22),
    ("haze", 21, 21),
    ("flurries", 14, 14),
    ("chanceflurries", 41, 46),
    ("chancerain", 39, 45),
    ("chancesleet", 5, 5),
    ("chancesnow", 41, 46),
    ("chancetstorms", 37, 47),
    ("clear", 32, 31),
    ("hazy", 21, 21),
    ("mostlycloudy", 28, 27),
    ("mostlysunny", 34, 33),
    ("partlycloudy", 30, 29),
    ("partlysunny", 30, 29),
    ("tstorms", 35, 35),
    ("unknown", UNKNOWN_CODE, UNKNOWN_CODE),
];

/// NWS icon image names, after percent suffixes have been stripped.
pub const NWS_ICONS: &[(&str, i32, i32)] = &[
    ("nbkn", 27, 27),
    ("bkn", 28, 27),
    ("nra", 12, 12),
    ("ra", 12, 12),
    ("nskc", 31, 31),
    ("skc", 32, 31),
    ("nfew", 33, 33),
    ("few", 34, 33),
    ("nsct", 29, 29),
    ("sct", 30, 29),
    ("hi_nshwrs", 45, 45),
    ("hi_shwrs", 39, 45),
    ("novc", 26, 26),
    ("ovc", 26, 26),
    ("nrasn", 46, 46),
    ("rasn", 41, 46),
    ("sn", 16, 16),
    ("nsn", 16, 16),
    ("ntsra", 35, 35),
    ("tsra", 35, 35),
    ("nscttsra", 35, 35),
    ("scttsra", 35, 35),
    ("hi_tsra", 37, 37),
    ("hi_ntsra", 47, 47),
    ("nwind", 24, 24),
    ("wind", 23, 24),
    ("sctfg", 20, 20),
    ("nfg", 20, 20),
    ("fg", 20, 20),
    ("cold", 15, 15),
    ("blizzard", 43, 43),
    ("ntor", 24, 24),
    ("tor", 23, 24),
    ("fzra", 5, 5),
    ("du", 19, 19),
    ("nshra", 12, 12),
    ("shra", 12, 12),
    ("nfu", 22, 22),
    ("fu", 22, 22),
    ("hot", 32, 31),
];

/// OWM condition ids and their group names.
pub const OWM_CODES: &[(&str, i32, i32)] = &[
    ("Thunderstorm", 37, 47),
    ("200", 37, 47),
    ("201", 37, 47),
    ("202", 37, 47),
    ("210", 37, 47),
    ("211", 37, 47),
    ("212", 37, 47),
    ("221", 37, 47),
    ("230", 37, 47),
    ("231", 37, 47),
    ("232", 37, 47),
    ("Drizzle", 9, 45),
    ("300", 9, 45),
    ("301", 9, 45),
    ("302", 9, 45),
    ("310", 9, 45),
    ("311", 9, 45),
    ("312", 9, 45),
    ("313", 9, 45),
    ("314", 9, 45),
    ("321", 9, 45),
    ("Rain", 40, 45),
    ("500", 11, 45),
    ("501", 12, 45),
    ("502", 40, 45),
    ("503", 40, 45),
    ("504", 40, 45),
    ("511", 7, 7),
    ("520", 11, 45),
    ("521", 12, 45),
    ("522", 40, 45),
    ("531", 40, 45),
    ("Snow", 41, 46),
    ("600", 13, 46),
    ("601", 14, 46),
    ("602", 16, 46),
    ("611", 7, 46),
    ("612", 6, 46),
    ("613", 5, 46),
    ("615", 5, 46),
    ("616", 7, 46),
    ("620", 13, 46),
    ("621", 14, 46),
    ("622", 16, 46),
    ("Mist", 11, 11),
    ("701", 11, 11),
    ("Smoke", 22, 22),
    ("711", 22, 22),
    ("Haze", 21, 21),
    ("721", 21, 21),
    ("Dust", 19, 19),
    ("731", 19, 19),
    ("761", 19, 19),
    ("Fog", 20, 20),
    ("741", 20, 20),
    ("Sand", 19, 19),
    ("751", 19, 19),
    ("Ash", 22, 22),
    ("762", 22, 22),
    ("Squall", 35, 35),
    ("771", 35, 35),
    ("Tornado", 23, 24),
    ("781", 23, 24),
    ("Clear", 32, 31),
    ("800", 32, 31),
    ("Clouds", 26, 26),
    ("801", 34, 33),
    ("802", 34, 33),
    ("803", 30, 29),
    ("804", 28, 27),
    ("unknown", UNKNOWN_CODE, UNKNOWN_CODE),
];

fn lookup(table: &[(&str, i32, i32)], token: &str) -> CodePair {
    table
        .iter()
        .find(|(name, _, _)| *name == token)
        .map(|(_, day, night)| CodePair {
            day: *day,
            night: *night,
        })
        .unwrap_or(CodePair::UNKNOWN)
}

/// Normalizes a textual icon name. A `nt_` prefix selects the night column
/// regardless of `phase`.
pub fn normalize_icon_name(name: &str, phase: Phase) -> i32 {
    let name = name.trim().to_ascii_lowercase();
    match name.strip_prefix(NIGHT_PREFIX) {
        Some(rest) => lookup(ICON_NAMES, rest).select(Phase::Night),
        None => lookup(ICON_NAMES, &name).select(phase),
    }
}

/// Normalizes an NWS icon link (or bare icon name).
pub fn normalize_nws_icon(url: &str, phase: Phase) -> i32 {
    lookup(NWS_ICONS, &icon_name_from_url(url)).select(phase)
}

/// Normalizes an OWM condition: the numeric id first, then the group name.
pub fn normalize_owm(id: Option<i64>, group: Option<&str>, phase: Phase) -> i32 {
    let by_id = id.map(|id| lookup(OWM_CODES, &id.to_string()));
    match by_id {
        Some(pair) if pair != CodePair::UNKNOWN => pair.select(phase),
        _ => group
            .map(|group| lookup(OWM_CODES, group.trim()).select(phase))
            .unwrap_or(UNKNOWN_CODE),
    }
}

/// Extracts the icon name from an icon URL: last path segment without
/// image extension, with `10`..`90` percent suffixes removed.
pub fn icon_name_from_url(url: &str) -> String {
    let segment = url.trim().rsplit('/').next().unwrap_or_default();
    let mut name = segment.to_ascii_lowercase();
    for extension in [".gif", ".jpg", ".png"] {
        if let Some(stripped) = name.strip_suffix(extension) {
            name = stripped.to_string();
            break;
        }
    }

    if name.contains('0') {
        for percent in (10..=90).step_by(10) {
            name = name.replace(&percent.to_string(), "");
        }
    }
    name
}

/// Substitutes the day variant of a code recorded under the night phase.
pub fn force_day(code: i32) -> i32 {
    match code {
        23 => 24,
        27 => 28,
        29 => 30,
        31 => 32,
        33 => 34,
        47 => 37,
        45 => 39,
        46 => 41,
        other => other,
    }
}

/// Substitutes the night variant of a code recorded under the day phase.
pub fn force_night(code: i32) -> i32 {
    match code {
        24 => 23,
        28 => 27,
        30 => 29,
        32 => 31,
        34 => 33,
        36 => 31,
        37 | 38 => 47,
        39 => 45,
        41 => 46,
        other => other,
    }
}

pub fn force_phase(code: i32, phase: Phase) -> i32 {
    match phase {
        Phase::Day => force_day(code),
        Phase::Night => force_night(code),
    }
}

pub fn is_known(code: i32) -> bool {
    (0..=MAX_CODE).contains(&code)
}

pub fn code_text(code: i32) -> &'static str {
    match code {
        0 => "Tornado",
        1 => "Tropical Storm",
        2 => "Hurricane",
        3 => "Severe Thunderstorms",
        4 => "Thunderstorms",
        5 => "Mixed Rain and Snow",
        6 => "Mixed Rain and Sleet",
        7 => "Mixed Snow and Sleet",
        8 => "Freezing Drizzle",
        9 => "Drizzle",
        10 => "Freezing Rain",
        11 | 12 => "Showers",
        13 => "Snow Flurries",
        14 => "Light Snow Showers",
        15 => "Blowing Snow",
        16 | 41 => "Snow",
        17 => "Hail",
        18 => "Sleet",
        19 => "Dust",
        20 => "Foggy",
        21 => "Haze",
        22 => "Smoky",
        23 => "Blustery",
        24 => "Windy",
        25 => "Cold",
        26 => "Cloudy",
        27 | 28 => "Mostly Cloudy",
        29 | 30 | 44 => "Partly Cloudy",
        31 => "Clear",
        32 => "Sunny",
        33 | 34 => "Fair",
        35 => "Mixed Rain and Hail",
        36 => "Hot",
        37 => "Isolated Thunderstorms",
        38 | 39 => "Scattered Thunderstorms",
        40 => "Scattered Showers",
        42 => "Scattered Snow Showers",
        43 => "Heavy Snow",
        45 => "Thundershowers",
        46 => "Snow Showers",
        47 => "Isolated Thundershowers",
        _ => "Unknown",
    }
}

/// Day when `now` lies in the current period's daylight window; without
/// one, day is the local hour range 07:00 to 19:00.
pub fn is_daytime<Tz: TimeZone>(current: Option<&ForecastPeriod>, now: &DateTime<Tz>) -> bool {
    match current.and_then(ForecastPeriod::daylight) {
        Some((start, end)) => {
            let now = now.with_timezone(&Utc);
            now >= start && now < end
        }
        None => (DAY_START_HOUR..DAY_END_HOUR).contains(&now.hour()),
    }
}
