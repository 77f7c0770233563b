/*
Copyright 2025 The gatewaylb-controller Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Translates `HTTPRouteMatch` sets into the load balancer's condition
//! expression language (§4.4 step 2), and merges the resulting rules into a
//! shared per-listener routing policy without clobbering other owners'
//! rules (§4.5).

pub mod mapper;
pub mod merge;

pub use mapper::map_matches;
pub use merge::{commit_routing_policy, merge_routing_rules};
