// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub(crate) trait Read {
    fn read(r: &mut Reader) -> Option<Self>
    where
        Self: Sized;
}

/// Little-endian cursor consuming a packet payload front to back.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn get(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.data.len() {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    pub(crate) fn read<T: Read>(&mut self) -> Option<T> {
        T::read(self)
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        Some(self.read_bytes::<1>()?[0])
    }

    pub(crate) fn read_i8(&mut self) -> Option<i8> {
        Some(self.read_bytes::<1>()?[0] as i8)
    }

    pub(crate) fn read_u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.read_bytes()?))
    }

    /// Reads a 3-octet field into the low bits of a u32.
    pub(crate) fn read_u24(&mut self) -> Option<u32> {
        let [b0, b1, b2] = self.read_bytes()?;
        Some(u32::from_le_bytes([b0, b1, b2, 0]))
    }

    pub(crate) fn read_bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        Some(<[u8; N]>::try_from(self.get(N)?).unwrap())
    }
}

impl Read for u8 {
    fn read(r: &mut Reader) -> Option<Self> {
        r.read_u8()
    }
}

impl Read for u16 {
    fn read(r: &mut Reader) -> Option<Self> {
        r.read_u16()
    }
}

/// Length-prefixed list: one count octet followed by the items.
impl<T: Read> Read for Vec<T> {
    fn read(r: &mut Reader) -> Option<Self> {
        let len = r.read_u8()? as usize;
        let vec: Vec<_> = (0..len).map_while(|_| r.read()).collect();
        (vec.len() == len).then_some(vec)
    }
}
