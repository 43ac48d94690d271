// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! DHCP Unique Identifiers (RFC 3315 section 9). This client names itself
//! with a DUID-LL built from its Ethernet address.

use crate::iface::MacAddr;

/// Upper bound on the DUIDs this client stores; longer server DUIDs cause
/// the message to be discarded.
pub const DUID_MAX_SIZE: usize = 32;

const DUID_LL: u16 = 3;
const HARDWARE_TYPE_ETHERNET: u16 = 1;

/// Builds a DUID-LL: 2-byte type, 2-byte hardware type, link-layer
/// address.
pub fn duid_ll(mac: MacAddr) -> Vec<u8> {
    let mut duid = Vec::with_capacity(10);
    duid.extend_from_slice(&DUID_LL.to_be_bytes());
    duid.extend_from_slice(&HARDWARE_TYPE_ETHERNET.to_be_bytes());
    duid.extend_from_slice(&mac.octets());
    duid
}
