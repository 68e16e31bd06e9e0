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

/* Splits a range into `slices` possibly even ranges. The remainder gets
 * spread over the leading slices. */
pub fn split_range_nicely(range: std::ops::Range<usize>, slices: usize)
    -> Vec<std::ops::Range<usize>>
{
    let len = range.end - range.start;
    let base = len / slices;
    let mut left = len - base * slices;

    let mut ranges = Vec::with_capacity(slices);
    let mut start = range.start;
    for _ in 0 .. slices {
        let sz = if left > 0 { left -= 1; base + 1 } else { base };
        if sz != 0 {
            ranges.push(start .. start + sz);
        }
        start += sz;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_whole_range() {
        let ranges = split_range_nicely(0 .. 10, 3);
        assert_eq!(ranges, vec![0 .. 4, 4 .. 7, 7 .. 10]);
    }

    #[test]
    fn split_drops_empty_slices() {
        let ranges = split_range_nicely(0 .. 2, 4);
        assert_eq!(ranges, vec![0 .. 1, 1 .. 2]);
    }
}
