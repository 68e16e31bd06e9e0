/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

lazy_static! {
    pub static ref DBG_LOG_LEVEL: usize = {
        use std::env;

        match env::var("FND_LOG_LEVEL") {
            Ok(lvl) => usize::from_str_radix(&lvl, 10).unwrap_or(DBG_WARN),
            Err(_) => DBG_WARN,
        }
    };
}

pub const DBG_CRITICAL: usize = 0;
pub const DBG_WARN: usize = 1;
pub const DBG_INFO: usize = 2;
pub const DBG_EXTRA: usize = 3;

pub const LOG_LVL_STR: &'static [&'static str] = &[
    "CRITICAL",
    "WARNING",
    "INFO",
    "EXTRA INFO",
];

/* Decode diagnostics (multi-driver nets, unconfigured instances) must
 * survive release builds, so the macro is always compiled in and gated
 * at runtime. */
macro_rules! dbg_log {
    ($lvl:expr, $fmt:literal $(, $v:expr )*) => {
        let lvl = crate::log::LOG_LVL_STR.len() - 1;
        let lvl = lvl.min($lvl);
        if *crate::log::DBG_LOG_LEVEL >= lvl {
            eprintln!(
                concat!("{}: ", $fmt),
                crate::log::LOG_LVL_STR[lvl] $(, &$v )*
            );
        }
    };
}
